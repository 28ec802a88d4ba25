//! Registry Bridge Core
//!
//! Bidirectional reconciliation between two service-discovery registries:
//!
//! - **Ports**: trait seams over the push/replicated target registry and the
//!   poll/subscribe source registry, injected at construction so tests can
//!   substitute in-memory fakes.
//! - **ReconciliationLoop**: fixed-delay full-scan pass that enumerates
//!   source services, renews target leases and ensures subscriptions exist.
//! - **EventBridge**: stateless diff-and-converge handler for pushed
//!   instance snapshots.
//! - **Provenance tagging**: a metadata marker records which registry owns
//!   each instance's source of truth, so the bridge never acts on its own
//!   echoes.

pub mod events;
pub mod ports;
pub mod reconciler;
pub mod subscriptions;
pub mod types;

pub use events::EventBridge;
pub use ports::{ChangeHandler, SourceRegistry, TargetRegistry};
pub use reconciler::{LoopHandle, ReconciliationLoop};
pub use subscriptions::SubscriptionTracker;
pub use types::{
    BridgeConfig, DeltaOutcome, InstanceAddress, InstanceStatus, Origin, ServiceChange,
    SourceInstance, TargetInstance, TickSummary,
};
