#![warn(missing_docs)]

//! # codegate-interface
//!
//! Turns a tool source's advertised operations into a typed declaration
//! document: one `<Name>Input` type per tool plus a namespace object whose
//! members are typed async functions.
//!
//! Generation is pure and deterministic. The same descriptor sequence always
//! yields byte-identical text, and [`ToolIndex`] records which namespace
//! identifier stands for which advertised tool.

mod descriptor;
mod live;
mod naming;
mod schema;

pub use descriptor::ToolDescriptor;
pub use live::LiveInterface;
pub use naming::{sanitize_name, to_pascal_case, ToolEntry, ToolIndex};
pub use schema::{input_is_optional, schema_to_type};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "tools";

/// Declaration text plus the identifier mapping it was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedInterface {
    /// The declaration document shown to code authors.
    pub text: String,
    /// Namespace object name (`tools` by default).
    pub namespace: String,
    /// Identifier → advertised tool name.
    pub index: ToolIndex,
}

/// Builds [`GeneratedInterface`]s for a fixed namespace name.
#[derive(Debug, Clone)]
pub struct InterfaceGenerator {
    namespace: String,
}

impl Default for InterfaceGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl InterfaceGenerator {
    /// Create a generator declaring tools under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace object name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Generate the interface for `tools` in the given order.
    pub fn generate(&self, tools: &[ToolDescriptor]) -> GeneratedInterface {
        let index = ToolIndex::build(tools.iter().map(|t| t.name.as_str()));
        let mut text = String::from("// Tool interface generated from the connected tool source.\n");

        for (tool, entry) in tools.iter().zip(index.entries()) {
            let input = schema_to_type(&tool.input_schema);
            text.push('\n');
            if let Some(desc) = &tool.description {
                text.push_str(&schema::doc_comment(desc, ""));
            }
            if input.starts_with('{') {
                text.push_str(&format!("interface {}Input {}\n", entry.type_name, input));
            } else {
                text.push_str(&format!("type {}Input = {};\n", entry.type_name, input));
            }
            text.push_str(&format!(
                "\ntype {}Output = Record<string, unknown>;\n",
                entry.type_name
            ));
        }

        text.push_str(&format!("\ndeclare const {}: {{\n", self.namespace));
        for (tool, entry) in tools.iter().zip(index.entries()) {
            if let Some(desc) = &tool.description {
                text.push_str(&schema::doc_comment(desc, "  "));
            }
            let optional = if input_is_optional(&tool.input_schema) { "?" } else { "" };
            text.push_str(&format!(
                "  {}(input{optional}: {ty}Input): Promise<{ty}Output>;\n",
                entry.identifier,
                ty = entry.type_name
            ));
        }
        text.push_str("};\n");

        tracing::debug!(
            namespace = %self.namespace,
            tools = index.len(),
            bytes = text.len(),
            "generated tool interface"
        );

        GeneratedInterface {
            text,
            namespace: self.namespace.clone(),
            index,
        }
    }
}

/// Generate an interface under the default `tools` namespace.
pub fn generate_interface(tools: &[ToolDescriptor]) -> GeneratedInterface {
    InterfaceGenerator::default().generate(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn music_tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "search-music!",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "sort": {"type": "string", "enum": ["a", "b"]}
                    },
                    "required": ["query"]
                }),
            )
            .with_description("Search the catalog"),
            ToolDescriptor::new("ping", json!({"type": "object"})),
        ]
    }

    #[test]
    fn renders_full_document() {
        let generated = generate_interface(&music_tools());
        let expected = "\
// Tool interface generated from the connected tool source.

/** Search the catalog */
interface SearchMusicInput {
  query: string;
  sort?: \"a\" | \"b\";
}

type SearchMusicOutput = Record<string, unknown>;

type PingInput = Record<string, unknown>;

type PingOutput = Record<string, unknown>;

declare const tools: {
  /** Search the catalog */
  search_music_(input: SearchMusicInput): Promise<SearchMusicOutput>;
  ping(input?: PingInput): Promise<PingOutput>;
};
";
        assert_eq!(generated.text, expected);
        assert_eq!(generated.index.original_name("search_music_"), Some("search-music!"));
    }

    #[test]
    fn generation_is_deterministic() {
        let tools = music_tools();
        let first = generate_interface(&tools);
        for _ in 0..10 {
            assert_eq!(generate_interface(&tools.clone()).text, first.text);
        }
    }

    #[test]
    fn custom_namespace() {
        let generated = InterfaceGenerator::new("api").generate(&music_tools());
        assert!(generated.text.contains("declare const api: {"));
        assert_eq!(generated.namespace, "api");
    }

    #[test]
    fn empty_tool_set_declares_empty_namespace() {
        let generated = generate_interface(&[]);
        assert!(generated.text.ends_with("declare const tools: {\n};\n"));
        assert!(generated.index.is_empty());
    }

    #[test]
    fn colliding_tools_are_both_declared() {
        let tools = vec![
            ToolDescriptor::new("get-user", json!({"type": "object"})),
            ToolDescriptor::new("get.user", json!({"type": "object"})),
        ];
        let generated = generate_interface(&tools);
        assert!(generated.text.contains("  get_user(input?: GetUserInput)"));
        assert!(generated.text.contains("  get_user_2(input?: GetUser2Input)"));
    }
}
