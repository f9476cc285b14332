//! Shared data model, ids, error taxonomy, and storage boundary for the
//! Apps Script Studio workflow execution engine and connector runtime.

pub mod error;
pub mod ids;
pub mod model;
pub mod store;

pub use error::{QuotaErrorKind, StudioError, StudioResult};
pub use ids::{ConnectionId, ExecutionId, NodeId, OrgId, UserId, WorkflowId};
pub use store::{ListPage, Store};
