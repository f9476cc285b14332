//! Jira connector (spec §4.3 example provider): Basic-auth REST API with
//! tenant-scoped base URLs (`https://{tenant}.atlassian.net`) and
//! path-parameterized operations.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use studio_core::model::Connection;
use studio_core::{StudioError, StudioResult};

use crate::client::ConnectorClient;
use crate::connectors::generic_rest::GenericRestConnector;

pub struct JiraConnector;

impl JiraConnector {
    /// Jira's base URL is tenant-specific, so the inner connector is built
    /// per-connection rather than once at startup (spec §4.3 "Endpoint
    /// conventions": some providers encode tenancy in the host).
    fn inner_for(connection: &Connection) -> StudioResult<GenericRestConnector> {
        let base_url = connection
            .base_url_override
            .clone()
            .ok_or_else(|| StudioError::BadInput("jira connection is missing base_url_override".into()))?;
        Ok(GenericRestConnector::new("jira", base_url)
            .with_operation("action.create_issue", Method::POST, "/rest/api/3/issue")
            .with_operation("action.get_issue", Method::GET, "/rest/api/3/issue/{id}")
            .with_operation("action.update_issue", Method::PUT, "/rest/api/3/issue/{id}")
            .with_operation("action.transition_issue", Method::POST, "/rest/api/3/issue/{id}/transitions")
            .with_operation("trigger.issue_updated", Method::GET, "/rest/api/3/search"))
    }
}

#[async_trait]
impl ConnectorClient for JiraConnector {
    fn slug(&self) -> &str {
        "jira"
    }

    async fn invoke(&self, connection: &Connection, operation: &str, params: Value) -> StudioResult<Value> {
        Self::inner_for(connection)?.invoke(connection, operation, params).await
    }

    async fn test_connection(&self, connection: &Connection) -> StudioResult<()> {
        Self::inner_for(connection)?.test_connection(connection).await
    }

    async fn dynamic_options(&self, connection: &Connection, field: &str, params: Value) -> StudioResult<Vec<Value>> {
        if field != "project" {
            return Err(StudioError::UnknownOperation(format!("no dynamic options field '{field}' on jira")));
        }
        let inner = GenericRestConnector::new(
            "jira",
            connection
                .base_url_override
                .clone()
                .ok_or_else(|| StudioError::BadInput("jira connection is missing base_url_override".into()))?,
        )
        .with_operation("list_projects", Method::GET, "/rest/api/3/project/search");
        let response = inner.invoke(connection, "list_projects", params).await?;
        let projects = response
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                let key = p.get("key")?.as_str()?.to_string();
                let name = p.get("name")?.as_str()?.to_string();
                Some(serde_json::json!({"value": key, "label": name}))
            })
            .collect();
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::model::ConnectionType;

    fn connection_without_base_url() -> Connection {
        Connection {
            id: studio_core::ConnectionId::new(),
            connector_id: "jira".into(),
            org_id: studio_core::OrgId::new(),
            conn_type: ConnectionType::Basic,
            access_token: None,
            refresh_token: None,
            expires_at: None,
            client_id: None,
            client_secret: None,
            username: Some("user@example.com".into()),
            secret: Some("token".into()),
            header_key: None,
            tenant_context: None,
            base_url_override: None,
        }
    }

    #[tokio::test]
    async fn invoke_without_base_url_override_is_bad_input() {
        let connector = JiraConnector;
        let err = connector
            .invoke(&connection_without_base_url(), "action.get_issue", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::BadInput(_)));
    }
}
