//! Connector Registry (spec §4.5, C3): lifecycle stage machine, rollout
//! admin API, and marketplace listing/execution gating for connector
//! descriptors.

pub mod lifecycle;
pub mod registry;

pub use lifecycle::{is_monotonic_transition, RolloutPatch};
pub use registry::{ConnectorRegistry, ListFilter};
