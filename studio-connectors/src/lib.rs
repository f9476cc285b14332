//! Connector Client and Credential/Token Manager (spec §4.3, §4.4; C1, C2).

pub mod auth;
pub mod client;
pub mod connectors;
pub mod envelope;
pub mod ratelimit;
pub mod registry;
pub mod webhook;

pub use auth::{RefreshedTokens, TokenManager, TokenPersistCallback, TokenRefresher};
pub use client::{
    validate_idempotency_key, with_retries, ConnectorClient, HandlerTable, Page, RetryPolicy,
};
pub use ratelimit::ConnectorRateLimiter;
pub use registry::ConnectorClientRegistry;
