//! Usage events emitted by the Scheduler and (from the other side of the
//! crate boundary) the Graph Runner, consumed by [`crate::ledger::UsageLedger`]
//! (spec §4.6 "Ingest").

use chrono::{DateTime, Utc};
use studio_core::{OrgId, UserId};

/// One of the three event kinds spec §4.6 says the ledger subscribes to.
#[derive(Debug, Clone)]
pub enum UsageEvent {
    /// Emitted by the Scheduler on admission (spec §4.1: "On admission the
    /// Scheduler emits a `usage.started` event to C7"). Counts one
    /// `workflowRuns` unit.
    Started { org_id: OrgId, user_id: UserId, at: DateTime<Utc> },
    /// Emitted once per node completion (spec §4.2 telemetry). Counts one
    /// `apiCalls` unit plus whatever tokens/cost the node reported.
    NodeFinished { org_id: OrgId, user_id: UserId, tokens_used: u64, cost_micros: u64, at: DateTime<Utc> },
    /// Emitted when an Execution reaches a terminal status. Carries no
    /// counter increments of its own (the run was already counted at
    /// `Started`); ledger consumers use it as a completion signal for
    /// bookkeeping that depends on the run being over.
    ExecutionFinished { org_id: OrgId, user_id: UserId, at: DateTime<Utc> },
}

impl UsageEvent {
    pub fn org_id(&self) -> OrgId {
        match self {
            UsageEvent::Started { org_id, .. }
            | UsageEvent::NodeFinished { org_id, .. }
            | UsageEvent::ExecutionFinished { org_id, .. } => *org_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            UsageEvent::Started { user_id, .. }
            | UsageEvent::NodeFinished { user_id, .. }
            | UsageEvent::ExecutionFinished { user_id, .. } => *user_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            UsageEvent::Started { at, .. }
            | UsageEvent::NodeFinished { at, .. }
            | UsageEvent::ExecutionFinished { at, .. } => *at,
        }
    }
}
