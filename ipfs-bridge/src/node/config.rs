//! Node configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::errors::NodeError;
use crate::events::{EventSink, NoOpEventSink};

/// Configuration for starting a node.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Whether the node joins the network. Offline nodes only see their own
    /// repository.
    #[serde(default = "default_online")]
    pub online: bool,
    /// Receives lifecycle events; set programmatically.
    #[serde(skip)]
    events: Option<Arc<dyn EventSink>>,
}

const fn default_online() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            online: default_online(),
            events: None,
        }
    }
}

impl NodeConfig {
    /// Creates a configuration with defaults (online, no event sink).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an offline configuration.
    #[must_use]
    pub fn offline() -> Self {
        Self::default().with_online(false)
    }

    /// Sets whether the node goes online.
    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the configured event sink, or a no-op sink.
    #[must_use]
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        self.events
            .clone()
            .unwrap_or_else(|| Arc::new(NoOpEventSink))
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, NodeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("online", &self.online)
            .field("events", &self.events.is_some())
            .finish()
    }
}

/// Options for adding content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOptions {
    /// Compute the CID without storing the content.
    #[serde(default)]
    pub only_hash: bool,
}

impl AddOptions {
    /// Options that only compute the CID.
    #[must_use]
    pub const fn only_hash() -> Self {
        Self { only_hash: true }
    }
}
