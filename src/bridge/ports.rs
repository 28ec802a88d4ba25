//! Registry Ports
//!
//! Trait-based abstractions over the two registries the bridge talks to.
//! Concrete clients (HTTP, SDK, in-memory fakes) implement these and are
//! injected at construction.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::types::{InstanceStatus, ServiceChange, SourceInstance, TargetInstance};

/// Write/read port over the push/replicated target registry.
///
/// Contract: every write is a local-only operation — implementations must not
/// re-propagate it to peer nodes from the write path itself (peer replication,
/// if any, is the registry's own concern and never re-enters the bridge).
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Current instances registered under the given canonical app name.
    /// Point-in-time snapshot; the bridge never caches it across calls.
    async fn list_instances(&self, app_name: &str) -> Result<Vec<TargetInstance>>;

    /// Register a new instance.
    async fn register(&self, record: TargetInstance) -> Result<()>;

    /// Remove an instance. Unknown instances are a benign no-op.
    async fn deregister(&self, app_name: &str, instance_id: &str) -> Result<()>;

    /// Refresh an instance's lease. Returns `false` when the instance is
    /// unknown; the bridge treats that as transient and does not fall back
    /// to registration here.
    async fn renew(&self, app_name: &str, instance_id: &str) -> Result<bool>;

    /// Overwrite an instance's status, carrying the reporting side's dirty
    /// timestamp (epoch millis). Not a re-registration.
    async fn update_status(
        &self,
        app_name: &str,
        instance_id: &str,
        status: InstanceStatus,
        dirty_timestamp_ms: i64,
    ) -> Result<()>;
}

/// Read/subscribe port over the poll/subscribe source registry.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// One page of service names. Pages are 1-based; a page shorter than
    /// `page_size` is the last one.
    async fn list_service_names(&self, page_no: u32, page_size: u32) -> Result<Vec<String>>;

    /// Point-in-time instance snapshot for one service.
    async fn list_instances(&self, service_name: &str) -> Result<Vec<SourceInstance>>;

    /// Install a change listener for the service. Subsequent snapshots are
    /// delivered asynchronously, possibly on any worker thread and
    /// concurrently for different services.
    async fn subscribe(&self, service_name: &str, handler: Arc<dyn ChangeHandler>) -> Result<()>;
}

/// Callback invoked with each pushed instance snapshot.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, change: ServiceChange);
}
