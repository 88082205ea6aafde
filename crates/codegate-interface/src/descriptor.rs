use serde::{Deserialize, Serialize};

/// One operation advertised by a tool source.
///
/// Deserializes from the `tools/list` shape (`inputSchema`) as well as the
/// snake_case form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Advertised tool name, unique within one tool source.
    pub name: String,
    /// Free-text description, rendered as a doc comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the single argument object.
    #[serde(default, alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Build a descriptor from its parts.
    pub fn new(name: impl Into<String>, input_schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
