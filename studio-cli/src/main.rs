//! Operator CLI for the Apps Script Studio workflow engine (spec §6):
//! submit/cancel/status against the Scheduler, connector rollout patches
//! against the Registry, usage export against the Ledger, and a `schema
//! check` subcommand that validates every reference connector's operation
//! schemas mirroring the generator's exit-code contract.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use studio_config::StudioConfig;
use studio_connectors::client::RetryPolicy;
use studio_connectors::ConnectorClientRegistry;
use studio_core::model::{Connection, Organization, Workflow};
use studio_core::{ExecutionId, OrgId, Store, StudioError, StudioResult, UserId, WorkflowId};
use studio_engine::{ConnectionLookup, GraphRunner, GraphRunnerConfig, NoopCredentialManager, WorkflowLookup};
use studio_otel::{init_telemetry, TelemetryConfig};
use studio_registry::{ConnectorRegistry, ListFilter, RolloutPatch};
use studio_scheduler::{DedupStore, RateCard, Scheduler, SchedulerConfig, UsageLedger};

#[derive(Parser)]
#[command(name = "studio", about = "Apps Script Studio workflow engine operator CLI")]
struct Cli {
    /// Path to `studio.toml`; defaults to `./studio.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seeds a workflow definition from a JSON file so it can be submitted.
    PutWorkflow { workflow_json: PathBuf },
    /// Seeds an organization definition from a JSON file.
    PutOrg { org_json: PathBuf },
    /// Seeds a connection definition from a JSON file.
    PutConnection { connection_json: PathBuf },
    /// Admits a new execution of a stored workflow.
    Submit {
        #[arg(long)]
        org: String,
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "cli-trigger")]
        trigger_event_id: String,
        #[arg(long, default_value = "cli-correlation")]
        correlation_id: String,
        /// JSON payload bound as the trigger node's output.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Requests cancellation of a running execution.
    Cancel { execution_id: String },
    /// Prints the current status of an execution.
    Status { execution_id: String },
    /// Connector registry operations.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Exports accumulated usage for one (org, user, period).
    UsageExport {
        #[arg(long)]
        org: String,
        #[arg(long)]
        user: String,
        /// `YYYY-MM`; defaults to the current UTC month.
        #[arg(long)]
        period: Option<String>,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Validates every reference connector's operation schemas, exiting
    /// non-zero if any descriptor fails to validate (mirrors the
    /// generator's exit-code contract).
    SchemaCheck,
}

#[derive(Subcommand)]
enum RegistryAction {
    List {
        #[arg(long)]
        marketplace_only: bool,
    },
    Patch {
        slug: String,
        /// A JSON object matching `RolloutPatch`'s field names.
        patch_json: String,
    },
}

/// Looks up `Workflow`/`Organization` by id out of the same `Store` the
/// Scheduler persists executions in.
struct StoreLookup {
    store: Arc<dyn Store>,
}

#[async_trait]
impl WorkflowLookup for StoreLookup {
    async fn get_workflow(&self, workflow_id: WorkflowId) -> StudioResult<Workflow> {
        let bytes = self
            .store
            .get(&format!("workflow:{workflow_id}"))
            .await?
            .ok_or_else(|| StudioError::NotFound(format!("workflow {workflow_id}")))?;
        serde_json::from_slice(&bytes).map_err(|e| StudioError::Storage(e.to_string()))
    }

    async fn get_organization(&self, org_id: OrgId) -> StudioResult<Organization> {
        let bytes = self
            .store
            .get(&format!("org:{org_id}"))
            .await?
            .ok_or_else(|| StudioError::NotFound(format!("organization {org_id}")))?;
        serde_json::from_slice(&bytes).map_err(|e| StudioError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ConnectionLookup for StoreLookup {
    async fn get_connection(&self, org_id: OrgId, connector_slug: &str) -> StudioResult<Connection> {
        let bytes = self
            .store
            .get(&format!("connection:{org_id}:{connector_slug}"))
            .await?
            .ok_or_else(|| StudioError::NotFound(format!("connection for {connector_slug} in org {org_id}")))?;
        serde_json::from_slice(&bytes).map_err(|e| StudioError::Storage(e.to_string()))
    }
}

/// Descriptors for the two reference connectors shipped with
/// `studio-connectors`, seeded at startup so `submit`/`schema check` have
/// something to resolve against without an external catalog service.
fn seed_connector_registry(registry: &ConnectorRegistry) -> StudioResult<()> {
    use studio_core::model::{ConnectorDescriptor, LifecycleStage, OperationDescriptor};

    registry.register(ConnectorDescriptor {
        slug: "slack".into(),
        display_name: "Slack".into(),
        semantic_version: "1.0.0".into(),
        schema_version: 1,
        lifecycle_stage: LifecycleStage::Stable,
        beta_start_at: None,
        beta_end_at: None,
        deprecation_start_at: None,
        sunset_at: None,
        actions: vec![
            OperationDescriptor {
                id: "action.post_message".into(),
                params_schema: serde_json::json!({"required": ["channel", "text"]}),
                supports_cancel: false,
            },
            OperationDescriptor {
                id: "action.update_message".into(),
                params_schema: serde_json::json!({"required": ["channel", "ts", "text"]}),
                supports_cancel: false,
            },
            OperationDescriptor {
                id: "action.add_reaction".into(),
                params_schema: serde_json::json!({"required": ["channel", "timestamp", "name"]}),
                supports_cancel: false,
            },
        ],
        triggers: vec![OperationDescriptor {
            id: "trigger.message_posted".into(),
            params_schema: serde_json::json!({}),
            supports_cancel: false,
        }],
    })?;

    registry.register(ConnectorDescriptor {
        slug: "jira".into(),
        display_name: "Jira".into(),
        semantic_version: "1.0.0".into(),
        schema_version: 1,
        lifecycle_stage: LifecycleStage::Stable,
        beta_start_at: None,
        beta_end_at: None,
        deprecation_start_at: None,
        sunset_at: None,
        actions: vec![
            OperationDescriptor {
                id: "action.create_issue".into(),
                params_schema: serde_json::json!({"required": ["summary", "projectKey"]}),
                supports_cancel: false,
            },
            OperationDescriptor {
                id: "action.update_issue".into(),
                params_schema: serde_json::json!({"required": ["id"]}),
                supports_cancel: false,
            },
            OperationDescriptor {
                id: "action.transition_issue".into(),
                params_schema: serde_json::json!({"required": ["id", "transitionId"]}),
                supports_cancel: false,
            },
        ],
        triggers: vec![OperationDescriptor {
            id: "trigger.issue_updated".into(),
            params_schema: serde_json::json!({}),
            supports_cancel: false,
        }],
    })?;

    Ok(())
}

/// Validates that every seeded connector's operation `params_schema`
/// values parse as JSON objects with a well-formed optional `required`
/// array -- the invariant `studio_engine::binding::validate_required`
/// relies on at node-execution time.
fn run_schema_check(registry: &ConnectorRegistry) -> bool {
    let mut ok = true;
    for descriptor in registry.list(&ListFilter::default()) {
        for op in descriptor.actions.iter().chain(descriptor.triggers.iter()) {
            if !op.params_schema.is_object() {
                eprintln!("schema check: {}.{} params_schema is not a JSON object", descriptor.slug, op.id);
                ok = false;
                continue;
            }
            if let Some(required) = op.params_schema.get("required") {
                if !required.is_array() || !required.as_array().unwrap().iter().all(|v| v.is_string()) {
                    eprintln!("schema check: {}.{} 'required' must be an array of strings", descriptor.slug, op.id);
                    ok = false;
                }
            }
        }
    }
    ok
}

fn build_store(config: &StudioConfig) -> Arc<dyn Store> {
    #[cfg(feature = "sled-backend")]
    {
        match studio_store::SledStore::open(&config.data_dir) {
            Ok(store) => return Arc::new(store),
            Err(e) => eprintln!("warning: failed to open sled store at {}: {e}; falling back to in-memory", config.data_dir),
        }
    }
    let _ = config;
    Arc::new(studio_store::MemoryStore::new())
}

async fn put_json<T: serde::Serialize>(store: &dyn Store, key: String, value: &T) -> StudioResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| StudioError::Storage(e.to_string()))?;
    store.put(&key, bytes).await
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = studio_config::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("warning: failed to load configuration: {e}; using defaults");
        StudioConfig::default()
    });

    let telemetry = init_telemetry(&TelemetryConfig { json_logs: cli.json_logs, ..Default::default() })
        .expect("telemetry subsystem failed to initialize");

    let exit_code = run(cli.command, &config).await;

    telemetry.shutdown();
    exit_code
}

async fn run(command: Command, config: &StudioConfig) -> std::process::ExitCode {
    let store = build_store(config);

    match command {
        Command::PutWorkflow { workflow_json } => match std::fs::read_to_string(&workflow_json) {
            Ok(contents) => match serde_json::from_str::<Workflow>(&contents) {
                Ok(workflow) => {
                    let key = format!("workflow:{}", workflow.id);
                    match put_json(store.as_ref(), key, &workflow).await {
                        Ok(()) => {
                            println!("{}", workflow.id);
                            std::process::ExitCode::SUCCESS
                        }
                        Err(e) => fail(e),
                    }
                }
                Err(e) => fail_msg(format!("invalid workflow JSON: {e}")),
            },
            Err(e) => fail_msg(format!("reading {}: {e}", workflow_json.display())),
        },

        Command::PutOrg { org_json } => match std::fs::read_to_string(&org_json) {
            Ok(contents) => match serde_json::from_str::<Organization>(&contents) {
                Ok(org) => {
                    let key = format!("org:{}", org.id);
                    match put_json(store.as_ref(), key, &org).await {
                        Ok(()) => {
                            println!("{}", org.id);
                            std::process::ExitCode::SUCCESS
                        }
                        Err(e) => fail(e),
                    }
                }
                Err(e) => fail_msg(format!("invalid organization JSON: {e}")),
            },
            Err(e) => fail_msg(format!("reading {}: {e}", org_json.display())),
        },

        Command::PutConnection { connection_json } => match std::fs::read_to_string(&connection_json) {
            Ok(contents) => match serde_json::from_str::<Connection>(&contents) {
                Ok(connection) => {
                    let key = format!("connection:{}:{}", connection.org_id, connection.connector_id);
                    match put_json(store.as_ref(), key, &connection).await {
                        Ok(()) => {
                            println!("{}", connection.id);
                            std::process::ExitCode::SUCCESS
                        }
                        Err(e) => fail(e),
                    }
                }
                Err(e) => fail_msg(format!("invalid connection JSON: {e}")),
            },
            Err(e) => fail_msg(format!("reading {}: {e}", connection_json.display())),
        },

        Command::Submit { org, workflow, user, trigger_event_id, correlation_id, payload } => {
            let (org_id, workflow_id, user_id) = match (parse_id(&org), parse_id(&workflow), parse_id(&user)) {
                (Ok(o), Ok(w), Ok(u)) => (o, w, u),
                _ => return fail_msg("org/workflow/user must be valid UUIDs".to_string()),
            };

            let lookup = Arc::new(StoreLookup { store: store.clone() });
            let organization = match lookup.get_organization(org_id).await {
                Ok(o) => o,
                Err(e) => return fail(e),
            };

            let scheduler = build_scheduler(store.clone(), lookup, config);

            let trigger_payload = match payload {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => return fail_msg(format!("invalid payload JSON: {e}")),
                },
                None => None,
            };

            match scheduler
                .submit_with_payload(&organization, workflow_id, user_id, trigger_event_id, correlation_id, trigger_payload)
                .await
            {
                Ok(execution_id) => {
                    println!("{execution_id}");
                    std::process::ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Command::Cancel { execution_id } => {
            let lookup = Arc::new(StoreLookup { store: store.clone() });
            let scheduler = build_scheduler(store.clone(), lookup, config);
            match parse_execution_id(&execution_id).and_then(|id| scheduler.cancel(id)) {
                Ok(()) => std::process::ExitCode::SUCCESS,
                Err(e) => fail(e),
            }
        }

        Command::Status { execution_id } => {
            let lookup = Arc::new(StoreLookup { store: store.clone() });
            let scheduler = build_scheduler(store.clone(), lookup, config);
            let Ok(id) = parse_execution_id(&execution_id) else {
                return fail_msg("execution id must be a valid UUID".to_string());
            };
            match scheduler.status(id).await {
                Ok(execution) => {
                    println!("{}", serde_json::to_string_pretty(&execution).unwrap());
                    std::process::ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Command::Registry { action } => {
            let registry = ConnectorRegistry::new();
            if let Err(e) = seed_connector_registry(&registry) {
                return fail(e);
            }
            match action {
                RegistryAction::List { marketplace_only } => {
                    let listing = registry.list(&ListFilter { lifecycle_stage: None, marketplace_only });
                    println!("{}", serde_json::to_string_pretty(&listing).unwrap());
                    std::process::ExitCode::SUCCESS
                }
                RegistryAction::Patch { slug, patch_json } => match serde_json::from_str::<RolloutPatch>(&patch_json) {
                    Ok(patch) => match registry.patch_rollout(&slug, &patch) {
                        Ok(updated) => {
                            println!("{}", serde_json::to_string_pretty(&updated).unwrap());
                            std::process::ExitCode::SUCCESS
                        }
                        Err(e) => fail(e),
                    },
                    Err(e) => fail_msg(format!("invalid patch JSON: {e}")),
                },
            }
        }

        Command::UsageExport { org, user, period, format } => {
            let (org_id, user_id) = match (parse_id(&org), parse_id(&user)) {
                (Ok(o), Ok(u)) => (o, u),
                _ => return fail_msg("org/user must be valid UUIDs".to_string()),
            };
            let ledger = UsageLedger::new(store.clone(), RateCard::default(), config.alert_bucket_secs);
            let period = period.unwrap_or_else(|| studio_scheduler::ledger::period_key(chrono::Utc::now()));
            match ledger.export(org_id, user_id, &period, &format).await {
                Ok(rendered) => {
                    println!("{rendered}");
                    std::process::ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Command::SchemaCheck => {
            let registry = ConnectorRegistry::new();
            if let Err(e) = seed_connector_registry(&registry) {
                return fail(e);
            }
            if run_schema_check(&registry) {
                println!("schema check: ok");
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::FAILURE
            }
        }
    }
}

fn build_scheduler(store: Arc<dyn Store>, lookup: Arc<StoreLookup>, config: &StudioConfig) -> Scheduler {
    let connector_registry = Arc::new(ConnectorRegistry::new());
    seed_connector_registry(&connector_registry).expect("reference connector descriptors are well-formed");

    let connector_clients = Arc::new(ConnectorClientRegistry::with_reference_connectors());
    let dedup = Arc::new(DedupStore::new(store.clone(), config.dedup_ttl_secs));
    let ledger = Arc::new(UsageLedger::new(store.clone(), RateCard::default(), config.alert_bucket_secs));

    let runner_config = GraphRunnerConfig {
        node_retry: RetryPolicy {
            max_attempts: config.retry.max_attempts,
            base_delay_ms: config.retry.base_delay_ms,
            max_delay_ms: config.retry.max_delay_ms,
        },
        max_concurrent_nodes: 8,
        execution_timeout: std::time::Duration::from_millis(config.execution_timeout_ms),
    };

    let runner = Arc::new(GraphRunner::new(
        lookup.clone(),
        lookup,
        Arc::new(NoopCredentialManager),
        connector_registry,
        connector_clients,
        ledger.clone(),
        store.clone(),
        runner_config,
    ));

    Scheduler::new(
        store,
        runner,
        dedup,
        ledger,
        SchedulerConfig {
            queue_timeout: std::time::Duration::from_millis(config.queue_timeout_ms),
            ..Default::default()
        },
    )
}

fn parse_id<T: std::str::FromStr>(s: &str) -> Result<T, T::Err> {
    s.parse()
}

fn parse_execution_id(s: &str) -> StudioResult<ExecutionId> {
    ExecutionId::parse_str(s).map_err(|e| StudioError::BadInput(e.to_string()))
}

fn fail(e: StudioError) -> std::process::ExitCode {
    eprintln!("error: {e}");
    std::process::ExitCode::FAILURE
}

fn fail_msg(msg: String) -> std::process::ExitCode {
    eprintln!("error: {msg}");
    std::process::ExitCode::FAILURE
}
