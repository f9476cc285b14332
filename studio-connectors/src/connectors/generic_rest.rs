//! A configuration-driven REST connector (spec §4.3): covers any provider
//! whose operations are a flat `{method, path}` table over one base URL and
//! JSON bodies. Providers with bespoke flows (pagination cursors, signed
//! requests, nonstandard envelopes) get their own connector instead, as
//! [`crate::connectors::slack`] and [`crate::connectors::jira`] do.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use studio_core::model::Connection;
use studio_core::{StudioError, StudioResult};

use crate::client::{with_retries, ConnectorClient, RetryPolicy};
use crate::envelope::{build_request_headers, classify_status, read_json_body, retry_after_ms};
use crate::ratelimit::ConnectorRateLimiter;

/// One entry in a [`GenericRestConnector`]'s operation table.
#[derive(Debug, Clone)]
pub struct RestOperation {
    pub method: Method,
    /// May contain `{param}` placeholders filled from `params.path.<param>`.
    pub path_template: String,
}

pub struct GenericRestConnector {
    slug: String,
    base_url: String,
    http: reqwest::Client,
    operations: HashMap<String, RestOperation>,
    retry_policy: RetryPolicy,
    /// Outbound throttle against this provider, independent of the
    /// Scheduler's per-org admission gate. `None` means unthrottled.
    rate_limiter: Option<Arc<ConnectorRateLimiter>>,
}

impl GenericRestConnector {
    pub fn new(slug: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            operations: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            rate_limiter: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>, method: Method, path_template: impl Into<String>) -> Self {
        self.operations.insert(operation.into(), RestOperation { method, path_template: path_template.into() });
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Caps outbound calls to this provider at `requests_per_second`.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.rate_limiter = ConnectorRateLimiter::new(requests_per_second).map(Arc::new);
        self
    }

    fn resolve_path(template: &str, params: &Value) -> String {
        let mut path = template.to_string();
        if let Some(path_params) = params.get("path").and_then(Value::as_object) {
            for (key, value) in path_params {
                let placeholder = format!("{{{key}}}");
                let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                path = path.replace(&placeholder, &rendered);
            }
        }
        path
    }

    async fn call_once(&self, connection: &Connection, op: &RestOperation, params: &Value) -> StudioResult<Value> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let url = format!("{}{}", self.base_url, Self::resolve_path(&op.path_template, params));
        let headers = build_request_headers(connection, &reqwest::header::HeaderMap::new())?;

        let mut request = self.http.request(op.method.clone(), &url).headers(headers);
        if let Some(query) = params.get("query") {
            request = request.query(&flatten_query(query));
        }
        if matches!(op.method, Method::POST | Method::PUT | Method::PATCH) {
            if let Some(body) = params.get("body") {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| StudioError::Network(e.to_string()))?;
        let retry_hint = retry_after_ms(response.headers());
        let envelope = read_json_body(response).await?;

        if let Some(err) = classify_status(envelope.status, retry_hint) {
            return Err(err);
        }
        Ok(envelope.body)
    }
}

fn flatten_query(value: &Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ConnectorClient for GenericRestConnector {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn invoke(&self, connection: &Connection, operation: &str, params: Value) -> StudioResult<Value> {
        let op = self
            .operations
            .get(operation)
            .ok_or_else(|| StudioError::UnknownOperation(operation.to_string()))?
            .clone();
        with_retries(&self.retry_policy, |_attempt| self.call_once(connection, &op, &params)).await
    }

    async fn test_connection(&self, connection: &Connection) -> StudioResult<()> {
        let headers = build_request_headers(connection, &reqwest::header::HeaderMap::new())?;
        let response = self
            .http
            .get(&self.base_url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| StudioError::Network(e.to_string()))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StudioError::AuthInvalid(format!("http {}", response.status())))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_substitutes_path_params() {
        let params = serde_json::json!({"path": {"id": "ISSUE-1"}});
        let resolved = GenericRestConnector::resolve_path("/issues/{id}", &params);
        assert_eq!(resolved, "/issues/ISSUE-1");
    }

    #[test]
    fn resolve_path_leaves_template_untouched_without_params() {
        let resolved = GenericRestConnector::resolve_path("/issues", &Value::Null);
        assert_eq!(resolved, "/issues");
    }

    fn test_connection() -> Connection {
        use studio_core::model::ConnectionType;
        use studio_core::{ConnectionId, OrgId};
        Connection {
            id: ConnectionId::new(),
            connector_id: "generic".to_string(),
            org_id: OrgId::new(),
            conn_type: ConnectionType::Bearer,
            access_token: Some("tok".to_string()),
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

    #[tokio::test]
    async fn invoke_retries_a_transient_server_error_then_succeeds() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/widgets/1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/widgets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        let connector = GenericRestConnector::new("generic", server.uri())
            .with_operation("action.get_widget", Method::GET, "/widgets/{id}")
            .with_retry_policy(RetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 5 });

        let params = serde_json::json!({"path": {"id": "1"}});
        let result = connector.invoke(&test_connection(), "action.get_widget", params).await.unwrap();
        assert_eq!(result, serde_json::json!({"id": "1"}));
    }

    #[tokio::test]
    async fn invoke_does_not_retry_past_max_attempts_on_persistent_server_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/widgets/1"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let connector = GenericRestConnector::new("generic", server.uri())
            .with_operation("action.get_widget", Method::GET, "/widgets/{id}")
            .with_retry_policy(RetryPolicy { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 5 });

        let params = serde_json::json!({"path": {"id": "1"}});
        let err = connector.invoke(&test_connection(), "action.get_widget", params).await.unwrap_err();
        assert!(matches!(err, StudioError::ServerError(_)));
    }
}
