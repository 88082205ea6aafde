//! The external tool source and the bridge that reaches it.

use std::sync::Arc;

use codegate_error::BridgeError;
use codegate_interface::{GeneratedInterface, ToolDescriptor};
use codegate_sandbox::ToolBridge;
use serde_json::Value;

/// Where tools come from.
///
/// The transport behind it (a subprocess, a socket, an in-process table) is
/// the implementation's business. Names passed to
/// [`call_tool`](Self::call_tool) are the tool's own advertised names, never
/// the sanitized identifiers the sandbox sees.
#[async_trait::async_trait]
pub trait ToolSource: Send + Sync {
    /// Lists the tools currently on offer, in a stable order.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError>;

    /// Invokes `name` with a single argument object.
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, BridgeError>;
}

/// Bridges sandbox identifiers to a [`ToolSource`] through one interface
/// snapshot.
///
/// A refresh during an execution does not change what that execution can
/// reach.
pub(crate) struct SourceBridge {
    source: Arc<dyn ToolSource>,
    interface: Arc<GeneratedInterface>,
}

impl SourceBridge {
    pub(crate) fn new(source: Arc<dyn ToolSource>, interface: Arc<GeneratedInterface>) -> Self {
        Self { source, interface }
    }
}

#[async_trait::async_trait]
impl ToolBridge for SourceBridge {
    fn identifiers(&self) -> Vec<String> {
        self.interface.index.identifiers().map(str::to_string).collect()
    }

    async fn call_tool(&self, identifier: &str, args: Value) -> Result<Value, BridgeError> {
        let Some(name) = self.interface.index.original_name(identifier) else {
            return Err(BridgeError::ToolNotFound {
                tool: identifier.to_string(),
            });
        };
        tracing::debug!(tool = %name, identifier, "dispatching tool call");
        let result = self.source.call_tool(name, args).await;
        if let Err(e) = &result {
            tracing::warn!(tool = %name, code = e.code(), error = %e, "tool call failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegate_interface::generate_interface;
    use serde_json::json;

    struct Recorder;

    #[async_trait::async_trait]
    impl ToolSource for Recorder {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, args: Value) -> Result<Value, BridgeError> {
            Ok(json!({ "called": name, "args": args }))
        }
    }

    fn bridge(names: &[&str]) -> SourceBridge {
        let tools: Vec<_> = names
            .iter()
            .map(|n| ToolDescriptor::new(*n, json!({ "type": "object" })))
            .collect();
        SourceBridge::new(Arc::new(Recorder), Arc::new(generate_interface(&tools)))
    }

    #[tokio::test]
    async fn identifiers_map_back_to_advertised_names() {
        let bridge = bridge(&["search-music!", "get.weather"]);
        assert_eq!(bridge.identifiers(), vec!["search_music_", "get_weather"]);

        let result = bridge.call_tool("search_music_", json!({ "q": "x" })).await.unwrap();
        assert_eq!(result["called"], "search-music!");
        assert_eq!(result["args"]["q"], "x");
    }

    #[tokio::test]
    async fn colliding_names_stay_distinct() {
        let bridge = bridge(&["a-b", "a.b"]);
        let first = bridge.call_tool("a_b", json!({})).await.unwrap();
        let second = bridge.call_tool("a_b_2", json!({})).await.unwrap();
        assert_eq!(first["called"], "a-b");
        assert_eq!(second["called"], "a.b");
    }

    #[tokio::test]
    async fn unknown_identifier_is_not_found() {
        let err = bridge(&["ping"]).call_tool("pong", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
    }
}
