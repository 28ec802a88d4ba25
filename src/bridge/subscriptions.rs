//! Subscription Tracking
//!
//! Ensures each service name is subscribed at most once for the process
//! lifetime, no matter how many reconciliation ticks see it.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use super::ports::{ChangeHandler, SourceRegistry};
use super::types::canonical_name;

/// Tracks which canonical service names already have an active
/// source-registry subscription. The set only ever grows; a service that
/// disappears from the listing simply stops receiving events, and its stale
/// subscription is harmless.
pub struct SubscriptionTracker {
    source: Arc<dyn SourceRegistry>,
    subscribed: Mutex<HashSet<String>>,
}

impl SubscriptionTracker {
    pub fn new(source: Arc<dyn SourceRegistry>) -> Self {
        Self {
            source,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe to change events for `raw_name` unless its canonical name
    /// is already tracked. Returns `true` when a new subscription was
    /// installed. The name is reserved before the subscribe call so
    /// concurrent callers cannot double-subscribe, and released again on
    /// failure so a later tick can retry.
    pub async fn ensure_subscribed(
        &self,
        raw_name: &str,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<bool> {
        let canonical = canonical_name(raw_name);

        {
            let mut tracked = self.subscribed.lock().await;
            if !tracked.insert(canonical.clone()) {
                return Ok(false);
            }
        }

        // Subscribe under the raw name; the source registry only knows its
        // own naming.
        match self.source.subscribe(raw_name, handler).await {
            Ok(()) => {
                info!(service = %canonical, "Subscribed to source registry changes");
                Ok(true)
            }
            Err(e) => {
                self.subscribed.lock().await.remove(&canonical);
                Err(e)
            }
        }
    }

    /// Number of services currently tracked.
    pub async fn len(&self) -> usize {
        self.subscribed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribed.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::{ServiceChange, SourceInstance};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NoopHandler;

    #[async_trait]
    impl ChangeHandler for NoopHandler {
        async fn on_change(&self, _change: ServiceChange) {}
    }

    #[derive(Default)]
    struct CountingSource {
        subscribe_calls: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl SourceRegistry for CountingSource {
        async fn list_service_names(&self, _page_no: u32, _page_size: u32) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn list_instances(&self, _service_name: &str) -> Result<Vec<SourceInstance>> {
            Ok(Vec::new())
        }

        async fn subscribe(
            &self,
            _service_name: &str,
            _handler: Arc<dyn ChangeHandler>,
        ) -> Result<()> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                bail!("subscribe refused");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_call_for_same_canonical_name_is_a_noop() {
        let source = Arc::new(CountingSource::default());
        let tracker = SubscriptionTracker::new(source.clone());
        let handler: Arc<dyn ChangeHandler> = Arc::new(NoopHandler);

        assert!(tracker
            .ensure_subscribed("GROUP@order-service", handler.clone())
            .await
            .unwrap());
        // Same canonical name through a different raw spelling.
        assert!(!tracker
            .ensure_subscribed("ORDER-SERVICE", handler.clone())
            .await
            .unwrap());

        assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn failed_subscribe_releases_the_name_for_retry() {
        let source = Arc::new(CountingSource::default());
        source.fail_next.store(true, Ordering::SeqCst);
        let tracker = SubscriptionTracker::new(source.clone());
        let handler: Arc<dyn ChangeHandler> = Arc::new(NoopHandler);

        assert!(tracker
            .ensure_subscribed("orders", handler.clone())
            .await
            .is_err());
        assert!(tracker.is_empty().await);

        // Next tick retries and succeeds.
        assert!(tracker.ensure_subscribed("orders", handler).await.unwrap());
        assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 2);
    }
}
