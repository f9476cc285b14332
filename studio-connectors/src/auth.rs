//! Credential/Token Manager (spec §4.4, C2).
//!
//! Auth header assembly is a pure function over [`Connection`]; the refresh
//! protocol is a single-flight primitive so concurrent callers that all
//! observe a near-expiry token share one underlying HTTP refresh call
//! (spec §8 invariant 2 / scenario S4).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use studio_core::model::{Connection, ConnectionType};
use studio_core::{StudioError, StudioResult};
use tokio::sync::Mutex;

/// Result of a successful OAuth2 refresh (spec §4.4).
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Performs the actual network call to a provider's token endpoint.
///
/// Implementations normalize provider quirks (token URL, grant type, body
/// encoding) at construction, per spec §4.3 "Endpoint conventions".
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, connection: &Connection) -> StudioResult<RefreshedTokens>;
}

/// Persists a refreshed token (the store boundary, spec §4.4
/// `onTokenRefreshed` callback).
#[async_trait]
pub trait TokenPersistCallback: Send + Sync {
    async fn on_token_refreshed(
        &self,
        connection_id: studio_core::ConnectionId,
        tokens: &RefreshedTokens,
    ) -> StudioResult<()>;
}

type SharedRefresh = Shared<BoxFuture<'static, StudioResult<RefreshedTokens>>>;

/// Coalesces concurrent refresh requests for the same connection into one
/// in-flight HTTP call (spec §4.4 "Refresh is coalesced").
///
/// Cancellation of a waiter does not cancel the in-flight refresh (spec §5):
/// dropping a caller's future only drops its handle on the `Shared` clone,
/// the underlying refresh task keeps running to completion.
pub struct TokenManager {
    refresher: Arc<dyn TokenRefresher>,
    callback: Arc<dyn TokenPersistCallback>,
    in_flight: Arc<Mutex<HashMap<studio_core::ConnectionId, SharedRefresh>>>,
}

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, callback: Arc<dyn TokenPersistCallback>) -> Self {
        Self { refresher, callback, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Returns a `Connection` whose token fields are fresh, refreshing (or
    /// joining an in-flight refresh of) the connection if
    /// `expiresAt - now < refreshSkew` or `expiresAt` is absent (spec §4.4).
    pub async fn ensure_fresh(
        &self,
        connection: &Connection,
        refresh_skew_secs: i64,
    ) -> StudioResult<Connection> {
        if !connection.conn_type.requires_refresh() {
            return Ok(connection.clone());
        }

        let needs_refresh = match connection.expires_at {
            None => true,
            Some(expires_at) => (expires_at - Utc::now()).num_seconds() < refresh_skew_secs,
        };
        if !needs_refresh {
            return Ok(connection.clone());
        }

        let shared = self.join_or_start_refresh(connection).await;
        let tokens = shared.await?;

        let mut refreshed = connection.clone();
        refreshed.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            refreshed.refresh_token = tokens.refresh_token;
        }
        refreshed.expires_at = Some(tokens.expires_at);
        Ok(refreshed)
    }

    async fn join_or_start_refresh(&self, connection: &Connection) -> SharedRefresh {
        let mut guard = self.in_flight.lock().await;
        if let Some(existing) = guard.get(&connection.id) {
            return existing.clone();
        }

        let refresher = self.refresher.clone();
        let callback = self.callback.clone();
        let in_flight = self.in_flight.clone();
        let conn = connection.clone();
        let id = connection.id;

        let fut: BoxFuture<'static, StudioResult<RefreshedTokens>> = async move {
            let result = refresher.refresh(&conn).await;
            if let Ok(ref tokens) = result {
                // Never retry the refresh itself inside this critical section
                // (spec §4.4) -- a persistence failure surfaces to callers as
                // part of the shared result, but the HTTP refresh already
                // succeeded and is not repeated.
                if let Err(e) = callback.on_token_refreshed(id, tokens).await {
                    tracing::warn!(connection_id = %id, error = %e, "failed to persist refreshed token");
                }
            }
            in_flight.lock().await.remove(&id);
            result
        }
        .boxed();

        let shared = fut.shared();
        guard.insert(connection.id, shared.clone());
        shared
    }
}

/// Auth variants assembled into request headers (spec §4.4), except
/// `SignedRequest`, which the caller must sign itself (e.g. AWS SigV4 via a
/// delegated signer) -- `None` from [`auth_headers`] for that variant means
/// "the connector client owns request signing," not "no auth."
pub fn auth_headers(connection: &Connection) -> StudioResult<Option<HeaderMap>> {
    match connection.conn_type {
        ConnectionType::Bearer | ConnectionType::OAuth2Code | ConnectionType::OAuth2ClientCredentials => {
            let token = connection
                .access_token
                .as_ref()
                .ok_or_else(|| StudioError::AuthInvalid("missing access_token".into()))?;
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, bearer_value(token)?);
            Ok(Some(headers))
        }
        ConnectionType::Basic => {
            let username = connection
                .username
                .as_ref()
                .ok_or_else(|| StudioError::AuthInvalid("missing username".into()))?;
            let secret = connection
                .secret
                .as_ref()
                .or(connection.access_token.as_ref())
                .ok_or_else(|| StudioError::AuthInvalid("missing password/apiToken".into()))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{secret}"));
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, header_value(&format!("Basic {encoded}"))?);
            Ok(Some(headers))
        }
        ConnectionType::Ssws => {
            let token = connection
                .access_token
                .as_ref()
                .ok_or_else(|| StudioError::AuthInvalid("missing SSWS token".into()))?;
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, header_value(&format!("SSWS {token}"))?);
            Ok(Some(headers))
        }
        ConnectionType::ApiKeyHeader => {
            let name = connection
                .header_key
                .as_ref()
                .ok_or_else(|| StudioError::AuthInvalid("missing header_key name".into()))?;
            let value = connection
                .secret
                .as_ref()
                .or(connection.access_token.as_ref())
                .ok_or_else(|| StudioError::AuthInvalid("missing header value".into()))?;
            let mut headers = HeaderMap::new();
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StudioError::AuthInvalid(format!("invalid header name {name}: {e}")))?;
            headers.insert(header_name, header_value(value)?);
            Ok(Some(headers))
        }
        ConnectionType::SignedRequest => Ok(None),
    }
}

/// Tenant context header some providers return at token-exchange time and
/// expect on every subsequent call (spec §4.4, e.g. ADP, Dataverse).
pub fn tenant_context_header(connection: &Connection, header_name: &str) -> Option<(HeaderName, HeaderValue)> {
    let ctx = connection.tenant_context.as_ref()?;
    let name = HeaderName::from_bytes(header_name.as_bytes()).ok()?;
    let value = HeaderValue::from_str(ctx).ok()?;
    Some((name, value))
}

fn bearer_value(token: &str) -> StudioResult<HeaderValue> {
    header_value(&format!("Bearer {token}"))
}

fn header_value(s: &str) -> StudioResult<HeaderValue> {
    HeaderValue::from_str(s).map_err(|e| StudioError::AuthInvalid(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use studio_core::{ConnectionId, OrgId};

    fn base_connection(conn_type: ConnectionType) -> Connection {
        Connection {
            id: ConnectionId::new(),
            connector_id: "slack".into(),
            org_id: OrgId::new(),
            conn_type,
            access_token: None,
            refresh_token: None,
            expires_at: None,
            client_id: None,
            client_secret: None,
            username: None,
            secret: None,
            header_key: None,
            tenant_context: None,
            base_url_override: None,
        }
    }

    #[test]
    fn bearer_header_round_trips_token() {
        let mut conn = base_connection(ConnectionType::Bearer);
        conn.access_token = Some("tok-123".into());
        let headers = auth_headers(&conn).unwrap().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok-123");
    }

    #[test]
    fn basic_header_encodes_username_and_secret() {
        let mut conn = base_connection(ConnectionType::Basic);
        conn.username = Some("user".into());
        conn.secret = Some("pass".into());
        let headers = auth_headers(&conn).unwrap().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn ssws_header_uses_ssws_scheme() {
        let mut conn = base_connection(ConnectionType::Ssws);
        conn.access_token = Some("okta-tok".into());
        let headers = auth_headers(&conn).unwrap().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "SSWS okta-tok");
    }

    #[test]
    fn api_key_header_uses_configured_name() {
        let mut conn = base_connection(ConnectionType::ApiKeyHeader);
        conn.header_key = Some("X-API-Key".into());
        conn.secret = Some("secret-value".into());
        let headers = auth_headers(&conn).unwrap().unwrap();
        assert_eq!(headers.get("X-API-Key").unwrap(), "secret-value");
    }

    #[test]
    fn signed_request_yields_no_headers() {
        let conn = base_connection(ConnectionType::SignedRequest);
        assert!(auth_headers(&conn).unwrap().is_none());
    }

    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _connection: &Connection) -> StudioResult<RefreshedTokens> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(RefreshedTokens {
                access_token: "new-token".into(),
                refresh_token: Some("new-refresh".into()),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                token_type: Some("Bearer".into()),
                scope: None,
            })
        }
    }

    struct NoopPersist;

    #[async_trait]
    impl TokenPersistCallback for NoopPersist {
        async fn on_token_refreshed(
            &self,
            _connection_id: studio_core::ConnectionId,
            _tokens: &RefreshedTokens,
        ) -> StudioResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_single_flight_to_one_call() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicU32::new(0) });
        let manager = Arc::new(TokenManager::new(refresher.clone(), Arc::new(NoopPersist)));

        let mut conn = base_connection(ConnectionType::OAuth2ClientCredentials);
        conn.client_id = Some("id".into());
        conn.client_secret = Some("secret".into());
        conn.refresh_token = Some("rt".into());
        conn.access_token = Some("stale".into());
        conn.expires_at = Some(Utc::now() + chrono::Duration::seconds(30));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = manager.clone();
            let conn = conn.clone();
            handles.push(tokio::spawn(async move { manager.ensure_fresh(&conn, 60).await }));
        }

        for h in handles {
            let refreshed = h.await.unwrap().unwrap();
            assert_eq!(refreshed.access_token.as_deref(), Some("new-token"));
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_token_skips_refresh_entirely() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicU32::new(0) });
        let manager = TokenManager::new(refresher.clone(), Arc::new(NoopPersist));

        let mut conn = base_connection(ConnectionType::OAuth2ClientCredentials);
        conn.client_id = Some("id".into());
        conn.client_secret = Some("secret".into());
        conn.refresh_token = Some("rt".into());
        conn.access_token = Some("still-good".into());
        conn.expires_at = Some(Utc::now() + chrono::Duration::hours(1));

        let result = manager.ensure_fresh(&conn, 60).await.unwrap();
        assert_eq!(result.access_token.as_deref(), Some("still-good"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}
