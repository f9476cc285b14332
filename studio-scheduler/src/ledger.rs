//! Usage & Quota Ledger (spec §4.6, C7): per-(org, user, period) counters,
//! threshold alerting with bucket coalescing, and CSV/JSON export.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use studio_core::model::UsageCounter;
use studio_core::{OrgId, Store, StudioError, StudioResult, UserId};

use crate::events::UsageEvent;

/// Calendar-month-in-UTC period key (spec §4.6 default). Org-level anchor
/// overrides are a per-deployment concern the `Store` layer above this
/// crate can implement by translating an anchor date into the same key
/// shape before calling [`UsageLedger::ingest`]; the ledger itself only
/// needs a stable string bucket.
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

fn counter_key(org_id: OrgId, user_id: UserId, period: &str) -> String {
    format!("usage:{org_id}:{user_id}:{period}")
}

/// The four countable quota dimensions (spec §3 `UsageCounter`,
/// distinguishing request counts from token counts per SPEC_FULL.md's
/// resolution of the source's blended metering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaType {
    ApiCalls,
    TokensUsed,
    WorkflowRuns,
    StorageBytes,
}

impl QuotaType {
    fn read(self, counter: &UsageCounter) -> u64 {
        match self {
            QuotaType::ApiCalls => counter.api_calls,
            QuotaType::TokensUsed => counter.tokens_used,
            QuotaType::WorkflowRuns => counter.workflow_runs,
            QuotaType::StorageBytes => counter.storage_bytes,
        }
    }
}

/// Per-user limits the threshold sweep checks usage against.
#[derive(Debug, Clone)]
pub struct UserLimits {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub limits: HashMap<QuotaType, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    ApproachingLimit,
    LimitExceeded,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub user_id: UserId,
    pub quota_type: QuotaType,
    pub kind: AlertKind,
    pub current: u64,
    pub limit: u64,
    pub bucket: String,
}

/// A rate-card entry: micros-of-cost per token, used to derive
/// `estimatedCostMicros` instead of recomputing cost logic in the ledger
/// itself (spec §9 open question resolution).
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCard {
    pub micros_per_token: u64,
}

/// One exported billing row (spec §4.6 "Export"). `email`/`plan_code`/
/// `plan_name` come from outside the ledger (an org/user directory this
/// crate doesn't own); callers join them onto the ledger's raw counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportRow {
    pub user_id: String,
    pub email: String,
    pub plan_code: String,
    pub plan_name: String,
    pub api_calls: u64,
    pub tokens_used: u64,
    pub workflow_runs: u64,
    pub storage_bytes: u64,
    pub estimated_cost_micros: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportSummary {
    pub row_count: usize,
    pub total_api_calls: u64,
    pub total_tokens_used: u64,
    pub total_workflow_runs: u64,
    pub total_estimated_cost_micros: u64,
}

pub struct UsageLedger {
    store: Arc<dyn Store>,
    rate_card: RateCard,
    /// Last alert emitted per `(user_id, quota_type, bucket)`, so repeated
    /// sweeps within the same bucket window coalesce to the latest reading
    /// instead of re-emitting (spec §4.6 "coalesced to the latest").
    pending_alerts: DashMap<(UserId, &'static str, String), Alert>,
    alert_bucket_secs: u64,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>, rate_card: RateCard, alert_bucket_secs: u64) -> Self {
        Self { store, rate_card, pending_alerts: DashMap::new(), alert_bucket_secs }
    }

    async fn load(&self, org_id: OrgId, user_id: UserId, period: &str) -> StudioResult<UsageCounter> {
        match self.store.get(&counter_key(org_id, user_id, period)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StudioError::Storage(e.to_string())),
            None => Ok(UsageCounter::default()),
        }
    }

    /// Applies one event's delta atomically via `compare_and_set`, retrying
    /// on a lost race against a concurrent writer for the same counter key.
    pub async fn ingest(&self, event: UsageEvent) -> StudioResult<UsageCounter> {
        let org_id = event.org_id();
        let user_id = event.user_id();
        let period = period_key(event.at());
        let key = counter_key(org_id, user_id, &period);

        loop {
            let existing_bytes = self.store.get(&key).await?;
            let mut counter: UsageCounter = match &existing_bytes {
                Some(bytes) => serde_json::from_slice(bytes).map_err(|e| StudioError::Storage(e.to_string()))?,
                None => UsageCounter::default(),
            };

            match &event {
                UsageEvent::Started { .. } => {
                    counter.workflow_runs += 1;
                }
                UsageEvent::NodeFinished { tokens_used, cost_micros, .. } => {
                    counter.api_calls += 1;
                    counter.tokens_used += tokens_used;
                    let derived_cost = self.rate_card.micros_per_token.saturating_mul(*tokens_used);
                    counter.estimated_cost_micros += (*cost_micros).max(derived_cost);
                }
                UsageEvent::ExecutionFinished { .. } => {}
            }

            let new_bytes = serde_json::to_vec(&counter).map_err(|e| StudioError::Storage(e.to_string()))?;
            if self.store.compare_and_set(&key, existing_bytes, new_bytes).await? {
                return Ok(counter);
            }
            // Lost the race to a concurrent writer; reload and retry.
        }
    }

    pub async fn current(&self, org_id: OrgId, user_id: UserId, period: &str) -> StudioResult<UsageCounter> {
        self.load(org_id, user_id, period).await
    }

    /// Computes `current/limit` per quota type for one user and returns
    /// alerts that should be dispatched now -- new crossings, or a
    /// re-crossing after the bucket window rolled over (spec §4.6
    /// "Thresholds").
    pub async fn sweep_user(
        &self,
        user_limits: &UserLimits,
        period: &str,
        threshold_pct: u8,
        now: DateTime<Utc>,
    ) -> StudioResult<Vec<Alert>> {
        let counter = self.load(user_limits.org_id, user_limits.user_id, period).await?;
        let bucket = (now.timestamp() as u64 / self.alert_bucket_secs.max(1)).to_string();

        let mut dispatched = Vec::new();
        for (quota_type, limit) in &user_limits.limits {
            if *limit == 0 {
                continue;
            }
            let current = quota_type.read(&counter);
            let kind = if current >= *limit {
                Some(AlertKind::LimitExceeded)
            } else if (current as f64 / *limit as f64) * 100.0 >= threshold_pct as f64 {
                Some(AlertKind::ApproachingLimit)
            } else {
                None
            };
            let Some(kind) = kind else { continue };

            let alert = Alert { user_id: user_limits.user_id, quota_type: *quota_type, kind, current, limit: *limit, bucket: bucket.clone() };
            let map_key = (user_limits.user_id, quota_type_label(*quota_type), bucket.clone());
            let is_new_or_changed = match self.pending_alerts.get(&map_key) {
                Some(existing) => existing.current != current || existing.kind != kind,
                None => true,
            };
            if is_new_or_changed {
                self.pending_alerts.insert(map_key, alert.clone());
                dispatched.push(alert);
            }
        }
        Ok(dispatched)
    }

    /// Renders the export row for one (org, user, period) as CSV or JSON
    /// (spec §4.6 "Export", spec §6 `GET /api/usage/export?format=json|csv`).
    /// `email`/`plan_code`/`plan_name` are blank here -- this crate doesn't
    /// own the org/user directory that would supply them; a deployment
    /// joining onto a real directory calls [`UsageLedger::export_row`]
    /// directly with a populated [`UserBillingProfile`] instead.
    pub async fn export(&self, org_id: OrgId, user_id: UserId, period: &str, format: &str) -> StudioResult<String> {
        let counter = self.current(org_id, user_id, period).await?;
        let profile = UserBillingProfile {
            user_id,
            email: String::new(),
            plan_code: String::new(),
            plan_name: String::new(),
        };
        let row = Self::export_row(profile, counter);
        match format {
            "csv" => Ok(to_csv(&[row])),
            _ => to_json(&[row]),
        }
    }

    pub fn export_row(profile: UserBillingProfile, counter: UsageCounter) -> ExportRow {
        ExportRow {
            user_id: profile.user_id.to_string(),
            email: profile.email,
            plan_code: profile.plan_code,
            plan_name: profile.plan_name,
            api_calls: counter.api_calls,
            tokens_used: counter.tokens_used,
            workflow_runs: counter.workflow_runs,
            storage_bytes: counter.storage_bytes,
            estimated_cost_micros: counter.estimated_cost_micros,
        }
    }

    pub fn summarize(rows: &[ExportRow]) -> ExportSummary {
        ExportSummary {
            row_count: rows.len(),
            total_api_calls: rows.iter().map(|r| r.api_calls).sum(),
            total_tokens_used: rows.iter().map(|r| r.tokens_used).sum(),
            total_workflow_runs: rows.iter().map(|r| r.workflow_runs).sum(),
            total_estimated_cost_micros: rows.iter().map(|r| r.estimated_cost_micros).sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserBillingProfile {
    pub user_id: UserId,
    pub email: String,
    pub plan_code: String,
    pub plan_name: String,
}

fn quota_type_label(q: QuotaType) -> &'static str {
    match q {
        QuotaType::ApiCalls => "api_calls",
        QuotaType::TokensUsed => "tokens_used",
        QuotaType::WorkflowRuns => "workflow_runs",
        QuotaType::StorageBytes => "storage_bytes",
    }
}

/// Renders export rows as JSON, bit-equivalent in content to
/// [`to_csv`] (spec §4.6: "CSV and JSON formats are bit-equivalent on the
/// underlying rows").
pub fn to_json(rows: &[ExportRow]) -> StudioResult<String> {
    serde_json::to_string(rows).map_err(|e| StudioError::Internal(e.to_string()))
}

pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut out = String::from("user_id,email,plan_code,plan_name,api_calls,tokens_used,workflow_runs,storage_bytes,estimated_cost_micros\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            row.user_id,
            row.email,
            row.plan_code,
            row.plan_name,
            row.api_calls,
            row.tokens_used,
            row.workflow_runs,
            row.storage_bytes,
            row.estimated_cost_micros
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_store::MemoryStore;

    fn ids() -> (OrgId, UserId) {
        (OrgId::new(), UserId::new())
    }

    #[tokio::test]
    async fn started_event_increments_workflow_runs() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let counter = ledger.ingest(UsageEvent::Started { org_id, user_id, at: Utc::now() }).await.unwrap();
        assert_eq!(counter.workflow_runs, 1);
    }

    #[tokio::test]
    async fn node_finished_increments_api_calls_and_tokens() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let counter = ledger
            .ingest(UsageEvent::NodeFinished { org_id, user_id, tokens_used: 100, cost_micros: 5, at: Utc::now() })
            .await
            .unwrap();
        assert_eq!(counter.api_calls, 1);
        assert_eq!(counter.tokens_used, 100);
    }

    #[tokio::test]
    async fn counters_accumulate_across_events_same_period() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let now = Utc::now();
        ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
        ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
        let counter = ledger.current(org_id, user_id, &period_key(now)).await.unwrap();
        assert_eq!(counter.workflow_runs, 2);
    }

    #[tokio::test]
    async fn concurrent_ingests_do_not_lose_updates() {
        let ledger = Arc::new(UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600));
        let (org_id, user_id) = ids();
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let counter = ledger.current(org_id, user_id, &period_key(now)).await.unwrap();
        assert_eq!(counter.workflow_runs, 20);
    }

    #[tokio::test]
    async fn sweep_emits_limit_exceeded_alert() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let now = Utc::now();
        for _ in 0..5 {
            ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
        }
        let mut limits = HashMap::new();
        limits.insert(QuotaType::WorkflowRuns, 5);
        let user_limits = UserLimits { org_id, user_id, limits };
        let alerts = ledger.sweep_user(&user_limits, &period_key(now), 80, now).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LimitExceeded);
    }

    #[tokio::test]
    async fn sweep_coalesces_duplicate_alerts_within_bucket() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let now = Utc::now();
        for _ in 0..5 {
            ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
        }
        let mut limits = HashMap::new();
        limits.insert(QuotaType::WorkflowRuns, 5);
        let user_limits = UserLimits { org_id, user_id, limits };
        let first = ledger.sweep_user(&user_limits, &period_key(now), 80, now).await.unwrap();
        let second = ledger.sweep_user(&user_limits, &period_key(now), 80, now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0, "unchanged reading within the same bucket should not re-dispatch");
    }

    #[tokio::test]
    async fn export_renders_csv_and_json_for_current_counters() {
        let ledger = UsageLedger::new(Arc::new(MemoryStore::new()), RateCard::default(), 3600);
        let (org_id, user_id) = ids();
        let now = Utc::now();
        ledger.ingest(UsageEvent::Started { org_id, user_id, at: now }).await.unwrap();
        let period = period_key(now);

        let csv = ledger.export(org_id, user_id, &period, "csv").await.unwrap();
        assert!(csv.contains("workflow_runs"));
        assert!(csv.contains('1'));

        let json = ledger.export(org_id, user_id, &period, "json").await.unwrap();
        assert!(json.contains("\"workflow_runs\":1"));
    }

    #[test]
    fn csv_and_json_export_cover_the_same_rows() {
        let row = ExportRow {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            plan_code: "pro".into(),
            plan_name: "Pro".into(),
            api_calls: 10,
            tokens_used: 200,
            workflow_runs: 3,
            storage_bytes: 1024,
            estimated_cost_micros: 500,
        };
        let csv = to_csv(&[row.clone()]);
        let json = to_json(&[row]).unwrap();
        assert!(csv.contains("u1"));
        assert!(json.contains("\"u1\""));
        assert!(csv.contains("500"));
        assert!(json.contains("500"));
    }
}
