//! Maps connector slugs to their [`ConnectorClient`] implementation. The
//! Node Executor looks up the client for a workflow node's connector once
//! per invocation and is otherwise agnostic to which provider it is
//! talking to (spec §4.3, §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use studio_core::{StudioError, StudioResult};

use crate::client::ConnectorClient;

#[derive(Clone, Default)]
pub struct ConnectorClientRegistry {
    clients: HashMap<String, Arc<dyn ConnectorClient>>,
}

impl ConnectorClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ConnectorClient>) -> &mut Self {
        self.clients.insert(client.slug().to_string(), client);
        self
    }

    pub fn get(&self, slug: &str) -> StudioResult<Arc<dyn ConnectorClient>> {
        self.clients.get(slug).cloned().ok_or_else(|| StudioError::NotFound(format!("connector '{slug}'")))
    }

    /// Populates the registry with the reference connectors shipped in
    /// [`crate::connectors`].
    pub fn with_reference_connectors() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::connectors::slack::SlackConnector::new()));
        registry.register(Arc::new(crate::connectors::jira::JiraConnector));
        registry
    }
}
