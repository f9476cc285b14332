//! Connector Client (spec §4.3, C1): the uniform `invoke`/`testConnection`
//! surface every connector implementation exposes to the Node Executor,
//! plus the retry wrapper and operation dispatch tables shared by the
//! reference connectors in [`crate::connectors`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use studio_core::model::{Connection, OperationDescriptor};
use studio_core::{StudioError, StudioResult};

/// Validates that a value-bearing operation's params carry a caller-supplied
/// `idempotencyKey` when its schema requires one (spec §4.4:
/// "the Connector Client refuses to fabricate them, and validates their
/// presence in parameter schemas"). Retries of the same node attempt pass
/// the same params object, so the key is naturally propagated unchanged.
pub fn validate_idempotency_key(descriptor: &OperationDescriptor, params: &Value) -> StudioResult<()> {
    let requires_key = descriptor
        .params_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|required| required.iter().any(|v| v.as_str() == Some("idempotencyKey")))
        .unwrap_or(false);
    if !requires_key {
        return Ok(());
    }
    let has_key = params.get("idempotencyKey").and_then(Value::as_str).map(|k| !k.is_empty()).unwrap_or(false);
    if has_key {
        Ok(())
    } else {
        Err(StudioError::SchemaViolation(format!("operation '{}' requires a non-empty idempotencyKey", descriptor.id)))
    }
}

/// One page of a cursor-paginated list operation (spec §4.3 pagination
/// convention: every connector that supports `list` operations returns
/// `items` plus an opaque `nextCursor`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Backoff schedule for [`with_retries`]. Distinct from
/// `studio_config::RetryConfig` so this crate has no config-layer
/// dependency; the CLI assembly wires the two together at startup.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

/// Retries `f` while its error is retryable (spec §4.2), honoring a
/// provider's `Retry-After`/`X-RateLimit-Reset` hint over the exponential
/// schedule when `StudioError::RateLimited` carries one.
pub async fn with_retries<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> StudioResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StudioResult<T>>,
{
    let mut attempt = 1;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && e.is_retryable() => {
                let delay = retry_delay(policy, attempt, &e);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying connector call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn retry_delay(policy: &RetryPolicy, attempt: u32, error: &StudioError) -> Duration {
    if let StudioError::RateLimited { retry_after_ms: Some(ms) } = error {
        return Duration::from_millis((*ms).min(policy.max_delay_ms));
    }
    let exp = policy.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(20));
    let capped = exp.min(policy.max_delay_ms);
    // +/-25% jitter (spec §4.2 invariant 6), not full jitter: spread is
    // [0.75, 1.25] x capped, not [0.5, 1.0].
    let jittered = (capped as f64 * (0.75 + jitter_fraction() * 0.5)) as u64;
    Duration::from_millis(jittered)
}

/// A cheap, non-cryptographic jitter source in `[0.0, 1.0)`; the caller
/// maps it onto the +/-25% spread the retry policy invariant checks for.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Uniform surface the Node Executor calls against every connector (spec
/// §4.3). Implementations own their own HTTP envelope and endpoint
/// conventions; this trait only fixes the calling contract.
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    fn slug(&self) -> &str;

    /// Executes one action or polls one trigger. `operation` is the
    /// operation id from the connector's [`studio_core::model::ConnectorDescriptor`].
    async fn invoke(&self, connection: &Connection, operation: &str, params: Value) -> StudioResult<Value>;

    /// Verifies a connection's credentials without side effects (used by
    /// the registry's connection-setup flow).
    async fn test_connection(&self, connection: &Connection) -> StudioResult<()>;

    /// Populates a dynamic-options field (e.g. "pick a Slack channel") for
    /// node configuration UIs. Connectors that expose no dynamic fields
    /// keep the default, which reports the field as unknown.
    async fn dynamic_options(&self, _connection: &Connection, field: &str, _params: Value) -> StudioResult<Vec<Value>> {
        Err(StudioError::UnknownOperation(format!("no dynamic options field '{field}' on {}", self.slug())))
    }
}

type HandlerFuture = std::pin::Pin<Box<dyn Future<Output = StudioResult<Value>> + Send>>;
type Handler = Arc<dyn Fn(Connection, Value) -> HandlerFuture + Send + Sync>;

/// Dispatch table mapping operation id to handler closure, used by
/// [`crate::connectors::generic_rest::GenericRestConnector`] and the
/// provider-shaped reference connectors to keep `invoke` a single lookup
/// instead of a large match statement per connector.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
    aliases: HashMap<String, String>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, operation: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StudioResult<Value>> + Send + 'static,
    {
        self.handlers.insert(operation.into(), Arc::new(move |conn, params| Box::pin(handler(conn, params))));
        self
    }

    /// Registers `alias` as another name for `canonical`, so a connector
    /// can rename an operation across schema versions without breaking
    /// workflows built against the old id.
    pub fn alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) -> &mut Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    pub fn resolve<'a>(&'a self, operation: &'a str) -> &'a str {
        self.aliases.get(operation).map(String::as_str).unwrap_or(operation)
    }

    pub async fn dispatch(&self, operation: &str, connection: Connection, params: Value) -> StudioResult<Value> {
        let resolved = self.resolve(operation).to_string();
        match self.handlers.get(&resolved) {
            Some(handler) => handler(connection, params).await,
            None => Err(StudioError::UnknownOperation(resolved)),
        }
    }
}
