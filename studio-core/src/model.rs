//! Entities from spec §3, shared by every component.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, ExecutionId, NodeId, OrgId, WorkflowId};

/// Per-organization execution limits (spec §3 "Organization").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_concurrent: u32,
    pub max_per_minute: u32,
    pub max_per_month: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self { max_concurrent: 5, max_per_minute: 60, max_per_month: 100_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub limits: ExecutionLimits,
    /// Beta-stage connectors this org has explicitly opted into.
    pub beta_opt_ins: Vec<String>,
}

/// Auth variant a [`Connection`] was provisioned with (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    Bearer,
    Basic,
    OAuth2Code,
    OAuth2ClientCredentials,
    ApiKeyHeader,
    Ssws,
    SignedRequest,
}

impl ConnectionType {
    /// Whether this variant requires the refresh protocol in spec §4.4.
    pub fn requires_refresh(&self) -> bool {
        matches!(self, ConnectionType::OAuth2Code | ConnectionType::OAuth2ClientCredentials)
    }
}

/// Opaque credential bundle. Fields beyond `id`/`connector_id`/`org_id`/
/// `conn_type` are provider-specific and intentionally untyped (spec §3:
/// "opaque fields").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub connector_id: String,
    pub org_id: OrgId,
    pub conn_type: ConnectionType,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
    pub header_key: Option<String>,
    pub tenant_context: Option<String>,
    pub base_url_override: Option<String>,
}

impl Connection {
    /// Invariant from spec §3: if the type requires refresh, both
    /// `refresh_token` and `(client_id, client_secret)` must be present.
    pub fn validate(&self) -> Result<(), String> {
        if self.conn_type.requires_refresh()
            && (self.refresh_token.is_none() || self.client_id.is_none() || self.client_secret.is_none())
        {
            return Err(format!(
                "connection {} of type {:?} requires refresh_token, client_id and client_secret",
                self.id, self.conn_type
            ));
        }
        Ok(())
    }
}

/// Rollout status of a connector (spec §3, §4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Planning,
    Beta,
    Stable,
    Deprecated,
    Sunset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub id: String,
    pub params_schema: serde_json::Value,
    /// Whether the node executor may drop an in-flight call at the
    /// execution deadline instead of letting it complete (§9 open
    /// question, resolved per-operation; see SPEC_FULL.md REDESIGN FLAGS).
    pub supports_cancel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub slug: String,
    pub display_name: String,
    pub semantic_version: String,
    pub schema_version: u32,
    pub lifecycle_stage: LifecycleStage,
    pub beta_start_at: Option<DateTime<Utc>>,
    pub beta_end_at: Option<DateTime<Utc>>,
    pub deprecation_start_at: Option<DateTime<Utc>>,
    pub sunset_at: Option<DateTime<Utc>>,
    pub actions: Vec<OperationDescriptor>,
    pub triggers: Vec<OperationDescriptor>,
}

impl ConnectorDescriptor {
    /// Invariant from spec §3: `sunsetAt >= deprecationStartAt >= betaStartAt`
    /// when present.
    pub fn validate_dates(&self) -> Result<(), String> {
        if let (Some(dep), Some(sunset)) = (self.deprecation_start_at, self.sunset_at) {
            if sunset < dep {
                return Err("sunsetAt must be >= deprecationStartAt".into());
            }
        }
        if let (Some(beta), Some(dep)) = (self.beta_start_at, self.deprecation_start_at) {
            if dep < beta {
                return Err("deprecationStartAt must be >= betaStartAt".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    /// Fully-qualified type, e.g. `trigger.slack.message_posted`,
    /// `action.jira.create_issue`, or `control.branch`.
    pub node_type: String,
    pub params: serde_json::Value,
    pub position: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub org_id: OrgId,
    pub version: u32,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionCounters {
    pub total_nodes: u32,
    pub completed_nodes: u32,
    pub failed_nodes: u32,
    pub skipped_nodes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub org_id: OrgId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub trigger_event_id: String,
    pub correlation_id: String,
    pub counters: ExecutionCounters,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub attempt: u32,
    pub input_snapshot: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub cache_hit: bool,
}

impl NodeExecution {
    pub fn pending(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: NodeStatus::Pending,
            attempt: 0,
            input_snapshot: None,
            output: None,
            error_kind: None,
            error_message: None,
            started_at: None,
            ended_at: None,
            cost_usd: 0.0,
            tokens_used: 0,
            cache_hit: false,
        }
    }

    /// Invariant from spec §3: status only moves forward except
    /// `failed -> ready` when a retry is scheduled.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self.status, next) {
            (Failed, Ready) => true,
            (a, b) if a == b => true,
            (Pending, Ready) | (Ready, Running) | (Running, Succeeded) | (Running, Failed) => true,
            (Pending, Skipped) | (Ready, Skipped) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitState {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after_hint_ms: Option<u64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self { limit: None, remaining: None, reset_at: None, retry_after_hint_ms: None }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounter {
    pub api_calls: u64,
    pub tokens_used: u64,
    pub workflow_runs: u64,
    pub storage_bytes: u64,
    pub estimated_cost_micros: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub first_seen_at: DateTime<Utc>,
    pub execution_id: ExecutionId,
}
