//! Event Bridge
//!
//! Event-driven delta handler: each pushed source-registry snapshot is
//! diffed against the target registry's current view for that service, and
//! the minimal set of register/deregister/status-update writes is applied.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::ports::{ChangeHandler, TargetRegistry};
use super::types::{
    canonical_name, DeltaOutcome, InstanceStatus, ServiceChange, SourceInstance, TargetInstance,
};

/// Stateless diff-and-converge pass over one service's instances.
///
/// Holds no state between invocations; the target view is fetched fresh for
/// every event and different services may be converged concurrently.
pub struct EventBridge {
    target: Arc<dyn TargetRegistry>,
}

impl EventBridge {
    pub fn new(target: Arc<dyn TargetRegistry>) -> Self {
        Self { target }
    }

    /// Converge the target registry's view of one service onto the pushed
    /// snapshot. Per-instance write failures are logged and recorded in the
    /// outcome; they never abort the rest of the event.
    pub async fn apply(&self, change: &ServiceChange) -> Result<DeltaOutcome> {
        let canonical = canonical_name(&change.service_name);
        let mut outcome = DeltaOutcome::empty(&canonical);

        let view = self
            .target
            .list_instances(&canonical)
            .await
            .with_context(|| format!("Failed to fetch target view for {}", canonical))?;

        debug!(
            service = %canonical,
            snapshot = change.instances.len(),
            view = view.len(),
            "Applying service change"
        );

        // Status/removal phase runs first so a moved instance is removed
        // under its old address before the registration phase adds the new
        // one.
        for registered in &view {
            match change
                .instances
                .iter()
                .find(|i| i.address == registered.address)
            {
                Some(matched) if matched.is_echo() => {
                    // The target's own instance reflected back through the
                    // source registry; mutating it would start a feedback
                    // loop.
                    outcome.skipped_echoes += 1;
                }
                Some(matched) => {
                    self.sync_status(registered, matched, &mut outcome).await;
                }
                None => {
                    self.deregister(registered, &mut outcome).await;
                }
            }
        }

        // Registration phase: snapshot instances with no counterpart in the
        // view. Only untagged instances register; anything already carrying
        // a provenance marker belongs to one of the bridge paths.
        for instance in change.instances.iter().filter(|i| i.origin.is_none()) {
            if !view.iter().any(|r| r.address == instance.address) {
                self.register(instance, &canonical, &mut outcome).await;
            }
        }

        info!(
            service = %canonical,
            registered = outcome.registered,
            deregistered = outcome.deregistered,
            status_updates = outcome.status_updates,
            skipped_echoes = outcome.skipped_echoes,
            errors = outcome.errors.len(),
            "Delta pass complete"
        );
        Ok(outcome)
    }

    /// Propagate the enabled flag as an UP/DOWN status write, carrying the
    /// source side's dirty timestamp. An unchanged status is left alone so
    /// repeated identical snapshots produce no writes.
    async fn sync_status(
        &self,
        registered: &TargetInstance,
        matched: &SourceInstance,
        outcome: &mut DeltaOutcome,
    ) {
        let status = InstanceStatus::from_enabled(matched.enabled);
        if registered.status == status {
            return;
        }

        info!(
            app = %registered.app_name,
            id = %registered.instance_id,
            status = %status,
            dirty_ms = matched.last_dirty_ms,
            "Updating instance status"
        );
        match self
            .target
            .update_status(
                &registered.app_name,
                &registered.instance_id,
                status,
                matched.last_dirty_ms,
            )
            .await
        {
            Ok(()) => outcome.status_updates += 1,
            Err(e) => {
                warn!(id = %registered.instance_id, error = %e, "Status update failed");
                outcome
                    .errors
                    .push(format!("status {}: {}", registered.instance_id, e));
            }
        }
    }

    /// The instance vanished from the source snapshot; take it out of the
    /// target registry.
    async fn deregister(&self, registered: &TargetInstance, outcome: &mut DeltaOutcome) {
        info!(
            app = %registered.app_name,
            id = %registered.instance_id,
            "Deregistering vanished instance"
        );
        match self
            .target
            .deregister(&registered.app_name, &registered.instance_id)
            .await
        {
            Ok(()) => outcome.deregistered += 1,
            Err(e) => {
                warn!(id = %registered.instance_id, error = %e, "Deregister failed");
                outcome
                    .errors
                    .push(format!("deregister {}: {}", registered.instance_id, e));
            }
        }
    }

    /// A native instance appeared; mirror it into the target registry with
    /// the bridged provenance marker set.
    async fn register(
        &self,
        instance: &SourceInstance,
        canonical: &str,
        outcome: &mut DeltaOutcome,
    ) {
        let record = TargetInstance::bridged_from(instance, canonical);
        info!(
            app = %canonical,
            id = %record.instance_id,
            address = %record.address,
            "Registering source instance"
        );
        match self.target.register(record).await {
            Ok(()) => outcome.registered += 1,
            Err(e) => {
                warn!(
                    app = %canonical,
                    address = %instance.address,
                    error = %e,
                    "Register failed"
                );
                outcome
                    .errors
                    .push(format!("register {}: {}", instance.address, e));
            }
        }
    }
}

#[async_trait]
impl ChangeHandler for EventBridge {
    async fn on_change(&self, change: ServiceChange) {
        if let Err(e) = self.apply(&change).await {
            error!(service = %change.service_name, error = %e, "Delta pass failed");
        }
    }
}
