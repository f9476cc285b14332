//! Stable, surface-level error taxonomy shared by every component.
//!
//! One variant per error `kind` in the spec's propagation policy. Each
//! component maps its own internal failures onto this enum at its public
//! boundary rather than letting component-specific error types leak across
//! crates.

use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

/// The three ways an execution can be refused admission (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaErrorKind {
    ConcurrentExceeded,
    RateExceeded,
    BudgetExceeded,
}

impl std::fmt::Display for QuotaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaErrorKind::ConcurrentExceeded => "concurrent_exceeded",
            QuotaErrorKind::RateExceeded => "rate_exceeded",
            QuotaErrorKind::BudgetExceeded => "budget_exceeded",
        };
        write!(f, "{s}")
    }
}

/// Stable error kinds, one variant per entry in spec §7.
#[derive(Error, Debug, Clone)]
pub enum StudioError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("auth invalid: {0}")]
    AuthInvalid(String),

    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("quota exceeded: {kind}")]
    QuotaExceeded { kind: QuotaErrorKind },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("connector sunset: {0}")]
    ConnectorSunset(String),

    #[error("beta not enabled for org: {0}")]
    BetaNotEnabled(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("queue timeout")]
    QueueTimeout,

    /// Informational, not a failure: the caller got back the id of an
    /// execution that already existed for this trigger event.
    #[error("duplicate event, original execution {execution_id}")]
    DuplicateEvent { execution_id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StudioError {
    /// Whether a [`crate::model::NodeExecution`] retry policy should retry
    /// this kind of failure (spec §4.2's transient/permanent split).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StudioError::Network(_)
                | StudioError::RateLimited { .. }
                | StudioError::ServerError(_)
                | StudioError::TokenRefreshFailed(_)
                | StudioError::Timeout
        )
    }

    /// The stable `kind` string used in surfaced diagnostics and telemetry.
    pub fn kind_str(&self) -> &'static str {
        match self {
            StudioError::BadInput(_) => "bad_input",
            StudioError::AuthInvalid(_) => "auth_invalid",
            StudioError::TokenRefreshFailed(_) => "token_refresh_failed",
            StudioError::Forbidden(_) => "forbidden",
            StudioError::NotFound(_) => "not_found",
            StudioError::RateLimited { .. } => "rate_limited",
            StudioError::QuotaExceeded { .. } => "quota_exceeded",
            StudioError::SchemaViolation(_) => "schema_violation",
            StudioError::ConnectorSunset(_) => "connector_sunset",
            StudioError::BetaNotEnabled(_) => "beta_not_enabled",
            StudioError::UnknownOperation(_) => "unknown_operation",
            StudioError::Network(_) => "network",
            StudioError::Timeout => "timeout",
            StudioError::ServerError(_) => "server_error",
            StudioError::Cancelled => "cancelled",
            StudioError::QueueTimeout => "queue_timeout",
            StudioError::DuplicateEvent { .. } => "duplicate_event",
            StudioError::Storage(_) => "storage",
            StudioError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_set_matches_spec() {
        assert!(StudioError::Network("x".into()).is_retryable());
        assert!(StudioError::RateLimited { retry_after_ms: Some(2000) }.is_retryable());
        assert!(StudioError::ServerError("500".into()).is_retryable());
        assert!(StudioError::TokenRefreshFailed("x".into()).is_retryable());
        assert!(!StudioError::BadInput("x".into()).is_retryable());
        assert!(!StudioError::AuthInvalid("x".into()).is_retryable());
        assert!(!StudioError::NotFound("x".into()).is_retryable());
        assert!(!StudioError::Forbidden("x".into()).is_retryable());
        assert!(!StudioError::SchemaViolation("x".into()).is_retryable());
    }

    #[test]
    fn kind_str_is_stable() {
        assert_eq!(
            StudioError::QuotaExceeded { kind: QuotaErrorKind::ConcurrentExceeded }.kind_str(),
            "quota_exceeded"
        );
    }
}
