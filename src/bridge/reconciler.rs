//! Reconciliation Loop
//!
//! Periodic full-scan pass: enumerates source-registry services, renews
//! target-registry leases for mirrored instances and ensures a change
//! subscription exists for every service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ports::{ChangeHandler, SourceRegistry, TargetRegistry};
use super::subscriptions::SubscriptionTracker;
use super::types::{canonical_name, instance_id, BridgeConfig, TickSummary};

/// Full-scan driver over the two registry ports.
///
/// Renewal is deliberately the only target write on this path: it refreshes
/// leases for already-known instances and is cheap and idempotent, while
/// first registration stays on the event path so "instance appeared" has a
/// single authoritative code path.
pub struct ReconciliationLoop {
    source: Arc<dyn SourceRegistry>,
    target: Arc<dyn TargetRegistry>,
    subscriptions: Arc<SubscriptionTracker>,
    handler: Arc<dyn ChangeHandler>,
    config: BridgeConfig,
}

impl ReconciliationLoop {
    pub fn new(
        source: Arc<dyn SourceRegistry>,
        target: Arc<dyn TargetRegistry>,
        subscriptions: Arc<SubscriptionTracker>,
        handler: Arc<dyn ChangeHandler>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            source,
            target,
            subscriptions,
            handler,
            config,
        }
    }

    /// Run one full-scan pass. Never fails as a whole: per-service errors
    /// are logged, collected into the summary, and processing continues with
    /// the next service. Public so tests can drive ticks deterministically.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::empty();

        let services = match self.list_all_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Failed to enumerate source registry services");
                summary.errors.push(e.to_string());
                return summary;
            }
        };

        summary.services_seen = services.len();

        for service in &services {
            if let Err(e) = self.sync_service(service, &mut summary).await {
                warn!(service = %service, error = %e, "Service sync failed, continuing with next");
                summary.errors.push(format!("{}: {}", service, e));
            }
        }

        info!(
            services = summary.services_seen,
            renewals = summary.renewals,
            subscriptions_added = summary.subscriptions_added,
            errors = summary.errors.len(),
            "Reconciliation tick complete"
        );
        summary
    }

    /// Exhaust the paged service-name listing. No cursor state survives
    /// this call; a page shorter than the page size is the last one.
    async fn list_all_services(&self) -> Result<Vec<String>> {
        // A zero page size would never produce a short final page, so a bad
        // config could wedge the tick; clamp to at least one name per page.
        let page_size = self.config.service_page_size.max(1);
        let mut names = Vec::new();
        let mut page_no = 1;

        loop {
            let page = self.source.list_service_names(page_no, page_size).await?;
            let last = (page.len() as u32) < page_size;
            names.extend(page);
            if last {
                break;
            }
            page_no += 1;
        }

        Ok(names)
    }

    /// Renew leases for one service's native instances and ensure its
    /// subscription exists.
    async fn sync_service(&self, service: &str, summary: &mut TickSummary) -> Result<()> {
        let instances = self.source.list_instances(service).await?;
        let canonical = canonical_name(service);

        for instance in instances.iter().filter(|i| !i.is_echo()) {
            let id = instance_id(&canonical, &instance.address);
            match self.target.renew(&canonical, &id).await {
                Ok(true) => summary.renewals += 1,
                Ok(false) => {
                    // Unknown to the target yet; the event path registers it.
                    debug!(app = %canonical, id = %id, "Renew skipped unknown instance");
                }
                Err(e) => {
                    warn!(app = %canonical, id = %id, error = %e, "Renew failed");
                    summary
                        .errors
                        .push(format!("{}: renew {}: {}", canonical, id, e));
                }
            }
        }

        if self
            .subscriptions
            .ensure_subscribed(service, Arc::clone(&self.handler))
            .await?
        {
            summary.subscriptions_added += 1;
        }

        Ok(())
    }

    /// Spawn the fixed-delay scheduler: sleep the initial delay, then run
    /// ticks with the period measured from the end of one tick to the start
    /// of the next, so ticks never overlap. There is no mid-tick
    /// cancellation; stopping takes effect between ticks.
    pub fn start(self: Arc<Self>) -> LoopHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let initial_delay = self.config.initial_delay();
        let period = self.config.period();

        let task = tokio::spawn(async move {
            if wait_or_stop(initial_delay, &mut stop_rx).await {
                return;
            }
            loop {
                self.tick().await;
                if wait_or_stop(period, &mut stop_rx).await {
                    return;
                }
            }
        });

        LoopHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Sleep for `delay`, returning early with `true` when a stop is signalled.
async fn wait_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = stop.changed() => true,
    }
}

/// Handle to a running reconciliation loop.
pub struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Stop scheduling further ticks and wait for the loop task to finish.
    /// A tick already in progress runs to completion first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ports::TargetRegistry;
    use crate::bridge::types::{InstanceStatus, ServiceChange, SourceInstance, TargetInstance};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct NoopHandler;

    #[async_trait]
    impl ChangeHandler for NoopHandler {
        async fn on_change(&self, _change: ServiceChange) {}
    }

    /// Source fake with a fixed catalog split into pages.
    struct PagedSource {
        names: Vec<String>,
        list_name_calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceRegistry for PagedSource {
        async fn list_service_names(&self, page_no: u32, page_size: u32) -> Result<Vec<String>> {
            self.list_name_calls.fetch_add(1, Ordering::SeqCst);
            let start = ((page_no - 1) * page_size) as usize;
            let end = (start + page_size as usize).min(self.names.len());
            if start >= self.names.len() {
                return Ok(Vec::new());
            }
            Ok(self.names[start..end].to_vec())
        }

        async fn list_instances(&self, service_name: &str) -> Result<Vec<SourceInstance>> {
            Ok(vec![SourceInstance::native(service_name, "10.0.0.1", 8080, true)])
        }

        async fn subscribe(
            &self,
            _service_name: &str,
            _handler: Arc<dyn ChangeHandler>,
        ) -> Result<()> {
            Ok(())
        }
    }

    /// Target fake recording renew calls; every instance is "known".
    #[derive(Default)]
    struct RenewRecorder {
        renewed: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TargetRegistry for RenewRecorder {
        async fn list_instances(&self, _app_name: &str) -> Result<Vec<TargetInstance>> {
            Ok(Vec::new())
        }

        async fn register(&self, _record: TargetInstance) -> Result<()> {
            Ok(())
        }

        async fn deregister(&self, _app_name: &str, _instance_id: &str) -> Result<()> {
            Ok(())
        }

        async fn renew(&self, app_name: &str, instance_id: &str) -> Result<bool> {
            self.renewed
                .lock()
                .unwrap()
                .push((app_name.to_string(), instance_id.to_string()));
            Ok(true)
        }

        async fn update_status(
            &self,
            _app_name: &str,
            _instance_id: &str,
            _status: InstanceStatus,
            _dirty_timestamp_ms: i64,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn make_loop(names: Vec<&str>, page_size: u32) -> (ReconciliationLoop, Arc<PagedSource>, Arc<RenewRecorder>) {
        let source = Arc::new(PagedSource {
            names: names.into_iter().map(String::from).collect(),
            list_name_calls: AtomicUsize::new(0),
        });
        let target = Arc::new(RenewRecorder::default());
        let subscriptions = Arc::new(SubscriptionTracker::new(source.clone()));
        let config = BridgeConfig {
            service_page_size: page_size,
            ..BridgeConfig::default()
        };
        let recon = ReconciliationLoop::new(
            source.clone(),
            target.clone(),
            subscriptions,
            Arc::new(NoopHandler),
            config,
        );
        (recon, source, target)
    }

    #[tokio::test]
    async fn tick_renews_under_canonical_name_and_deterministic_id() {
        let (recon, _, target) = make_loop(vec!["group@order-service"], 10);
        let summary = recon.tick().await;

        assert_eq!(summary.services_seen, 1);
        assert_eq!(summary.renewals, 1);
        assert!(summary.errors.is_empty());

        let renewed = target.renewed.lock().unwrap().clone();
        assert_eq!(
            renewed,
            vec![("ORDER-SERVICE".to_string(), "ORDER-SERVICE:10.0.0.1:8080".to_string())]
        );
    }

    #[tokio::test]
    async fn paging_exhausts_the_catalog() {
        let (recon, source, _) = make_loop(vec!["a", "b", "c", "d", "e"], 2);
        let summary = recon.tick().await;

        assert_eq!(summary.services_seen, 5);
        // Three pages: 2 + 2 + 1; the short page ends the loop.
        assert_eq!(source.list_name_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_page_size_still_terminates() {
        let (recon, source, _) = make_loop(vec!["a", "b"], 0);
        let summary = recon.tick().await;

        assert_eq!(summary.services_seen, 2);
        // Clamped to one name per page: two full pages plus the empty one.
        assert_eq!(source.list_name_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_tick_adds_no_new_subscriptions() {
        let (recon, _, _) = make_loop(vec!["orders", "billing"], 10);

        let first = recon.tick().await;
        assert_eq!(first.subscriptions_added, 2);

        let second = recon.tick().await;
        assert_eq!(second.subscriptions_added, 0);
        assert_eq!(second.renewals, 2);
    }
}
