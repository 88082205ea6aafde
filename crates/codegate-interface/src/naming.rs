//! Tool name sanitization and the identifier → tool name index.

use std::collections::HashSet;

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
///
/// Not injective: `a-b` and `a.b` both become `a_b`. [`ToolIndex`] resolves
/// the resulting collisions.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Split on `-` and `_`, capitalize the first letter of each segment,
/// lowercase the rest and concatenate.
pub fn to_pascal_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Sanitized name that is also a valid identifier start.
fn identifier_base(name: &str) -> String {
    let sanitized = sanitize_name(name);
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{sanitized}")
    } else {
        sanitized
    }
}

fn type_name_base(identifier: &str) -> String {
    let pascal = to_pascal_case(identifier);
    if pascal.is_empty() || pascal.starts_with(|c: char| c.is_ascii_digit()) {
        format!("Tool{pascal}")
    } else {
        pascal
    }
}

/// Returns `base` if unused, otherwise `base{sep}2`, `base{sep}3`, ...
fn claim(base: String, sep: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}{sep}{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// One tool's names as exposed in the generated interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEntry {
    /// Member name on the tool namespace.
    pub identifier: String,
    /// Name the tool source advertised.
    pub name: String,
    /// Stem for the generated `<Stem>Input` / `<Stem>Output` types.
    pub type_name: String,
}

/// Explicit mapping from namespace identifier to original tool name.
///
/// Built once per descriptor set. Identifiers are unique: when two names
/// sanitize to the same identifier the later one receives the smallest free
/// numeric suffix (`_2`, `_3`, ...), so tools are never silently merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolIndex {
    entries: Vec<ToolEntry>,
}

impl ToolIndex {
    /// Build the index for tool names in advertised order.
    pub fn build<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut identifiers = HashSet::new();
        let mut type_names = HashSet::new();
        let entries = names
            .into_iter()
            .map(|name| {
                let identifier = claim(identifier_base(name), "_", &mut identifiers);
                let type_name = claim(type_name_base(&identifier), "", &mut type_names);
                if identifier != sanitize_name(name) {
                    tracing::debug!(tool = %name, identifier = %identifier, "tool identifier disambiguated");
                }
                ToolEntry {
                    identifier,
                    name: name.to_string(),
                    type_name,
                }
            })
            .collect();
        Self { entries }
    }

    /// Original tool name for a namespace identifier.
    pub fn original_name(&self, identifier: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.name.as_str())
    }

    /// Whether `identifier` names a tool.
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.iter().any(|e| e.identifier == identifier)
    }

    /// Identifiers in advertised order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identifier.as_str())
    }

    /// All entries in advertised order.
    pub fn entries(&self) -> &[ToolEntry] {
        &self.entries
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no tools.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
