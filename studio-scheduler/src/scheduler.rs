//! Execution Scheduler / Quota Gate (spec §4.1, C6): admits, queues, runs
//! and cancels graph executions per organization, wired to an injected
//! [`ExecutionRunner`] (the Graph Runner, in `studio-engine`, which depends
//! on this crate -- so the dependency points the other way here).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use studio_core::model::{Execution, ExecutionCounters, ExecutionStatus, ExecutionLimits, Organization};
use studio_core::{ExecutionId, OrgId, Store, StudioError, StudioResult, UserId, WorkflowId};

use crate::cancellation::CancellationSignal;
use crate::dedup::DedupStore;
use crate::events::UsageEvent;
use crate::gate::{AdmitOutcome, OrgGate};
use crate::ledger::UsageLedger;

fn execution_key(id: ExecutionId) -> String {
    format!("execution:{id}")
}

fn heartbeat_key(id: ExecutionId) -> String {
    format!("heartbeat:{id}")
}

/// The Graph Runner contract the Scheduler dispatches admitted
/// submissions to (spec §4.2). Implemented by `studio-engine`.
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn run(
        &self,
        execution: Execution,
        workflow_id: WorkflowId,
        cancellation: CancellationSignal,
    ) -> StudioResult<Execution>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_depth: usize,
    pub queue_timeout: Duration,
    /// Restart-recovery window (spec §4.1 Failure model): a non-terminal
    /// execution with a heartbeat newer than this is assumed still alive.
    pub interrupt_window: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 100,
            queue_timeout: Duration::from_secs(600),
            interrupt_window: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

struct RunningHandle {
    org_id: OrgId,
    cancellation: CancellationSignal,
}

pub struct IngestOutcome {
    pub execution_id: ExecutionId,
    pub duplicate: bool,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    gates: DashMap<OrgId, Arc<OrgGate>>,
    runner: Arc<dyn ExecutionRunner>,
    running: Arc<DashMap<ExecutionId, RunningHandle>>,
    dedup: Arc<DedupStore>,
    ledger: Arc<UsageLedger>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn ExecutionRunner>,
        dedup: Arc<DedupStore>,
        ledger: Arc<UsageLedger>,
        config: SchedulerConfig,
    ) -> Self {
        Self { store, gates: DashMap::new(), runner, running: Arc::new(DashMap::new()), dedup, ledger, config }
    }

    fn gate_for(&self, org: &Organization) -> Arc<OrgGate> {
        if let Some(gate) = self.gates.get(&org.id) {
            gate.set_limits(org.limits);
            return gate.clone();
        }
        let gate = Arc::new(OrgGate::new(org.limits, self.config.queue_depth));
        self.gates.insert(org.id, gate.clone());
        gate
    }

    /// Admits, queues, or rejects a submission (spec §4.1). On admission,
    /// spawns the Graph Runner in the background and returns immediately
    /// with the new execution's id.
    #[tracing::instrument(skip(self, trigger_payload), fields(org_id = %org.id, workflow_id = %workflow_id))]
    pub async fn submit(
        &self,
        org: &Organization,
        workflow_id: WorkflowId,
        user_id: UserId,
        trigger_event_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> StudioResult<ExecutionId> {
        self.submit_with_payload(org, workflow_id, user_id, trigger_event_id, correlation_id, None).await
    }

    /// Same as [`Scheduler::submit`], but also seeds the trigger node's
    /// output (spec §4.2 input binding reads it back off
    /// `Execution.tags["trigger_payload"]`) with the provider's event
    /// payload. Also stamps `tags["user_id"]` so the Graph Runner's usage
    /// telemetry attributes node-level events to the submitting user
    /// rather than a synthesized one.
    #[tracing::instrument(skip(self, trigger_payload), fields(org_id = %org.id, workflow_id = %workflow_id))]
    pub async fn submit_with_payload(
        &self,
        org: &Organization,
        workflow_id: WorkflowId,
        user_id: UserId,
        trigger_event_id: impl Into<String>,
        correlation_id: impl Into<String>,
        trigger_payload: Option<serde_json::Value>,
    ) -> StudioResult<ExecutionId> {
        let gate = self.gate_for(org);
        let now = Utc::now();

        match gate.try_admit(now) {
            AdmitOutcome::Rejected(kind) => return Err(StudioError::QuotaExceeded { kind }),
            AdmitOutcome::Admitted => {}
            AdmitOutcome::Queued(rx) => match tokio::time::timeout(self.config.queue_timeout, rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(StudioError::Cancelled),
                Err(_) => {
                    gate.cancel_wait();
                    return Err(StudioError::QueueTimeout);
                }
            },
        }

        let mut tags = HashMap::new();
        tags.insert("user_id".to_string(), user_id.to_string());
        if let Some(payload) = trigger_payload {
            tags.insert("trigger_payload".to_string(), payload.to_string());
        }

        let execution = Execution {
            id: ExecutionId::new(),
            workflow_id,
            org_id: org.id,
            started_at: now,
            ended_at: None,
            status: ExecutionStatus::Running,
            trigger_event_id: trigger_event_id.into(),
            correlation_id: correlation_id.into(),
            counters: ExecutionCounters::default(),
            tags,
        };
        self.persist(&execution).await?;
        self.ledger.ingest(UsageEvent::Started { org_id: org.id, user_id, at: now }).await?;

        let cancellation = CancellationSignal::new();
        self.running.insert(execution.id, RunningHandle { org_id: org.id, cancellation: cancellation.clone() });

        let execution_id = execution.id;
        let store = self.store.clone();
        let runner = self.runner.clone();
        let running = self.running.clone();
        let gate_for_release = gate;
        let ledger = self.ledger.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let heartbeat_store = store.clone();
            let heartbeat_handle = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(heartbeat_interval).await;
                    let _ = heartbeat_store.put(&heartbeat_key(execution_id), Utc::now().to_rfc3339().into_bytes()).await;
                }
            });

            let result = runner.run(execution, workflow_id, cancellation).await;
            heartbeat_handle.abort();
            let _ = store.delete(&heartbeat_key(execution_id)).await;

            let finished_at = Utc::now();
            let final_execution = match result {
                Ok(mut exec) => {
                    exec.ended_at = Some(finished_at);
                    exec
                }
                Err(e) => Execution {
                    id: execution_id,
                    workflow_id,
                    org_id: running.get(&execution_id).map(|h| h.org_id).unwrap_or(org_id_placeholder()),
                    started_at: now,
                    ended_at: Some(finished_at),
                    status: ExecutionStatus::Failed,
                    trigger_event_id: String::new(),
                    correlation_id: String::new(),
                    counters: ExecutionCounters::default(),
                    tags: HashMap::from([("error".to_string(), e.kind_str().to_string())]),
                },
            };

            if let Ok(bytes) = serde_json::to_vec(&final_execution) {
                let _ = store.put(&execution_key(execution_id), bytes).await;
            }
            let _ = ledger.ingest(UsageEvent::ExecutionFinished { org_id: final_execution.org_id, user_id, at: finished_at }).await;

            gate_for_release.release(finished_at);
            running.remove(&execution_id);
        });

        Ok(execution_id)
    }

    /// Dedup-gated entrypoint for trigger ingestion (spec §4.7, §6: "the
    /// response is `202 Accepted {executionId}` on admission or the
    /// deduped id on replay").
    pub async fn ingest(
        &self,
        org: &Organization,
        workflow_id: WorkflowId,
        user_id: UserId,
        trigger_slug: &str,
        event_id: &str,
        correlation_id: impl Into<String>,
        dedup_ttl_override: Option<u64>,
    ) -> StudioResult<IngestOutcome> {
        self.ingest_with_payload(org, workflow_id, user_id, trigger_slug, event_id, correlation_id, dedup_ttl_override, None)
            .await
    }

    /// Same as [`Scheduler::ingest`], seeding the trigger node's output
    /// with the provider's webhook body (spec §6 "Trigger ingestion
    /// endpoints").
    pub async fn ingest_with_payload(
        &self,
        org: &Organization,
        workflow_id: WorkflowId,
        user_id: UserId,
        trigger_slug: &str,
        event_id: &str,
        correlation_id: impl Into<String>,
        dedup_ttl_override: Option<u64>,
        trigger_payload: Option<serde_json::Value>,
    ) -> StudioResult<IngestOutcome> {
        if let Some(existing) = self.dedup.seen(trigger_slug, event_id, dedup_ttl_override).await? {
            return Ok(IngestOutcome { execution_id: existing.execution_id, duplicate: true });
        }
        let execution_id =
            self.submit_with_payload(org, workflow_id, user_id, event_id, correlation_id, trigger_payload).await?;
        self.dedup.record(trigger_slug, event_id, execution_id).await?;
        Ok(IngestOutcome { execution_id, duplicate: false })
    }

    /// Sets the cancellation signal observed at the next node boundary
    /// (spec §4.1 "Cancellation"). Does not abort in-flight HTTP calls.
    pub fn cancel(&self, execution_id: ExecutionId) -> StudioResult<()> {
        let handle = self.running.get(&execution_id).ok_or_else(|| StudioError::NotFound(execution_id.to_string()))?;
        handle.cancellation.cancel();
        Ok(())
    }

    pub async fn status(&self, execution_id: ExecutionId) -> StudioResult<Execution> {
        let bytes = self
            .store
            .get(&execution_key(execution_id))
            .await?
            .ok_or_else(|| StudioError::NotFound(execution_id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StudioError::Storage(e.to_string()))
    }

    async fn persist(&self, execution: &Execution) -> StudioResult<()> {
        let bytes = serde_json::to_vec(execution).map_err(|e| StudioError::Storage(e.to_string()))?;
        self.store.put(&execution_key(execution.id), bytes).await
    }

    /// Restart recovery (spec §4.1 Failure model): scans persisted
    /// Executions, marking non-terminal ones `failed("interrupted")`
    /// unless a recent heartbeat says a runner still owns them.
    pub async fn recover(&self) -> StudioResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.store.list("execution:", cursor.as_deref()).await?;
            for key in &page.keys {
                let Some(bytes) = self.store.get(key).await? else { continue };
                let Ok(mut execution) = serde_json::from_slice::<Execution>(&bytes) else { continue };
                if execution.status.is_terminal() {
                    continue;
                }

                let alive = match self.store.get(&heartbeat_key(execution.id)).await? {
                    Some(hb_bytes) => {
                        let hb_str = String::from_utf8_lossy(&hb_bytes);
                        chrono::DateTime::parse_from_rfc3339(&hb_str)
                            .map(|hb| (Utc::now() - hb.with_timezone(&Utc)) < self.config.interrupt_window)
                            .unwrap_or(false)
                    }
                    None => false,
                };

                if alive {
                    report.still_running += 1;
                    continue;
                }

                execution.status = ExecutionStatus::Failed;
                execution.ended_at = Some(Utc::now());
                execution.tags.insert("error".to_string(), "interrupted".to_string());
                self.persist(&execution).await?;
                report.marked_interrupted += 1;
            }
            match page.cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    pub marked_interrupted: u64,
    pub still_running: u64,
}

fn org_id_placeholder() -> OrgId {
    OrgId::new()
}
