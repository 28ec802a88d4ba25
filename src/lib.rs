//! Registry Bridge Library
//!
//! Mirrors service instances from a poll/subscribe registry (the "source")
//! into a push/replicated registry (the "target") without double
//! registration. A periodic full-scan loop keeps leases fresh and installs
//! change subscriptions; an event-driven handler diffs each pushed snapshot
//! against the target's current view and converges it.

pub mod bridge;

pub use bridge::events::EventBridge;
pub use bridge::ports::{ChangeHandler, SourceRegistry, TargetRegistry};
pub use bridge::reconciler::{LoopHandle, ReconciliationLoop};
pub use bridge::subscriptions::SubscriptionTracker;
pub use bridge::types::BridgeConfig;
