//! Slack connector (spec §4.3 example provider): bearer-token REST API with
//! one dynamic-options field (channel picker) layered over the generic REST
//! dispatch.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use studio_core::model::Connection;
use studio_core::{StudioError, StudioResult};

use crate::client::ConnectorClient;
use crate::connectors::generic_rest::GenericRestConnector;

pub struct SlackConnector {
    inner: GenericRestConnector,
    http: reqwest::Client,
}

impl SlackConnector {
    pub fn new() -> Self {
        let inner = GenericRestConnector::new("slack", "https://slack.com/api")
            .with_operation("action.post_message", Method::POST, "/chat.postMessage")
            .with_operation("action.update_message", Method::POST, "/chat.update")
            .with_operation("action.add_reaction", Method::POST, "/reactions.add")
            .with_operation("trigger.message_posted", Method::GET, "/conversations.history");
        Self { inner, http: reqwest::Client::new() }
    }
}

impl Default for SlackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectorClient for SlackConnector {
    fn slug(&self) -> &str {
        "slack"
    }

    async fn invoke(&self, connection: &Connection, operation: &str, params: Value) -> StudioResult<Value> {
        let body = self.inner.invoke(connection, operation, params).await?;
        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
            return Err(classify_slack_error(error));
        }
        Ok(body)
    }

    async fn test_connection(&self, connection: &Connection) -> StudioResult<()> {
        let headers = crate::envelope::build_request_headers(connection, &reqwest::header::HeaderMap::new())?;
        let response = self
            .http
            .get("https://slack.com/api/auth.test")
            .headers(headers)
            .send()
            .await
            .map_err(|e| StudioError::Network(e.to_string()))?;
        let envelope = crate::envelope::read_json_body(response).await?;
        if envelope.body.get("ok").and_then(Value::as_bool) == Some(false) {
            return Err(StudioError::AuthInvalid("slack auth.test failed".into()));
        }
        Ok(())
    }

    /// Populates the `channel` dynamic-options field by listing channels the
    /// authenticated user/bot can post to (spec §4.3 dynamic-options).
    async fn dynamic_options(&self, connection: &Connection, field: &str, _params: Value) -> StudioResult<Vec<Value>> {
        if field != "channel" {
            return Err(StudioError::UnknownOperation(format!("no dynamic options field '{field}' on slack")));
        }
        let headers = crate::envelope::build_request_headers(connection, &reqwest::header::HeaderMap::new())?;
        let response = self
            .http
            .get("https://slack.com/api/conversations.list")
            .headers(headers)
            .send()
            .await
            .map_err(|e| StudioError::Network(e.to_string()))?;
        let envelope = crate::envelope::read_json_body(response).await?;
        let channels = envelope
            .body
            .get("channels")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                let id = c.get("id")?.as_str()?.to_string();
                let name = c.get("name")?.as_str()?.to_string();
                Some(serde_json::json!({"value": id, "label": name}))
            })
            .collect();
        Ok(channels)
    }
}

/// Slack's API returns `200 OK` with `{"ok": false, "error": "..."}` on
/// failure rather than a non-2xx status; this maps those error codes onto
/// the stable taxonomy the same way [`crate::envelope::classify_status`]
/// maps HTTP statuses for providers that use them correctly.
fn classify_slack_error(error: &str) -> StudioError {
    match error {
        "not_authed" | "invalid_auth" | "token_expired" | "token_revoked" => {
            StudioError::AuthInvalid(error.to_string())
        }
        "missing_scope" | "restricted_action" => StudioError::Forbidden(error.to_string()),
        "channel_not_found" | "user_not_found" => StudioError::NotFound(error.to_string()),
        "rate_limited" => StudioError::RateLimited { retry_after_ms: None },
        "invalid_arguments" | "invalid_blocks" | "msg_too_long" => StudioError::SchemaViolation(error.to_string()),
        _ => StudioError::BadInput(error.to_string()),
    }
}
