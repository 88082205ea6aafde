//! JSON Schema → structural type translation.
//!
//! Translation never fails: shapes it does not recognize become `unknown`.

use serde_json::{Map, Value};

const UNKNOWN: &str = "unknown";
const INDENT: &str = "  ";

/// Translate a schema node into inline type text at the top nesting level.
pub fn schema_to_type(schema: &Value) -> String {
    render(schema, 0)
}

/// Whether a tool taking this schema can be called without an argument.
///
/// True for object (or untyped) schemas with no required properties.
pub fn input_is_optional(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return true;
    };
    if ["anyOf", "oneOf", "allOf"].iter().any(|k| obj.contains_key(*k)) {
        return false;
    }
    let object_like = match obj.get("type") {
        None => true,
        Some(Value::String(t)) => t == "object",
        Some(_) => false,
    };
    let has_required = obj
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| !r.is_empty());
    object_like && !has_required
}

fn render(schema: &Value, depth: usize) -> String {
    let Some(obj) = schema.as_object() else {
        return UNKNOWN.to_string();
    };

    if let Some(branches) = obj
        .get("anyOf")
        .or_else(|| obj.get("oneOf"))
        .and_then(Value::as_array)
    {
        return union(branches.iter().map(|b| render(b, depth)));
    }

    // Only the first branch: not an intersection.
    if let Some(first) = obj
        .get("allOf")
        .and_then(Value::as_array)
        .and_then(|b| b.first())
    {
        return render(first, depth);
    }

    match obj.get("type") {
        Some(Value::String(ty)) => render_typed(ty, obj, depth),
        Some(Value::Array(types)) => union(
            types
                .iter()
                .filter_map(Value::as_str)
                .map(|ty| render_typed(ty, obj, depth)),
        ),
        _ if obj.contains_key("properties") => render_object(obj, depth),
        _ => UNKNOWN.to_string(),
    }
}

fn render_typed(ty: &str, obj: &Map<String, Value>, depth: usize) -> String {
    match ty {
        "string" => match obj.get("enum").and_then(Value::as_array) {
            Some(values) => {
                let literals: Vec<String> = values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(string_literal)
                    .collect();
                if literals.is_empty() {
                    "string".to_string()
                } else {
                    union(literals.into_iter())
                }
            }
            None => "string".to_string(),
        },
        "number" | "integer" => "number".to_string(),
        "boolean" => "boolean".to_string(),
        "null" => "null".to_string(),
        "array" => {
            let item = match obj.get("items") {
                Some(items @ Value::Object(_)) => render(items, depth),
                _ => UNKNOWN.to_string(),
            };
            if !item.starts_with('{') && item.contains(" | ") {
                format!("({item})[]")
            } else {
                format!("{item}[]")
            }
        }
        "object" => render_object(obj, depth),
        _ => UNKNOWN.to_string(),
    }
}

fn render_object(obj: &Map<String, Value>, depth: usize) -> String {
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .filter(|p| !p.is_empty());

    let Some(properties) = properties else {
        return match obj.get("additionalProperties") {
            Some(Value::Bool(false)) => "Record<string, never>".to_string(),
            Some(values @ Value::Object(_)) => {
                format!("Record<string, {}>", render(values, depth))
            }
            _ => "Record<string, unknown>".to_string(),
        };
    };

    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    // Key order must not depend on serde_json's map feature flags.
    let mut sorted: Vec<(&String, &Value)> = properties.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let inner = INDENT.repeat(depth + 1);
    let mut out = String::from("{\n");
    for (name, prop) in sorted {
        if let Some(desc) = prop.get("description").and_then(Value::as_str) {
            out.push_str(&doc_comment(desc, &inner));
        }
        let marker = if required.contains(&name.as_str()) { "" } else { "?" };
        out.push_str(&format!(
            "{inner}{}{marker}: {};\n",
            property_key(name),
            render(prop, depth + 1)
        ));
    }
    out.push_str(&INDENT.repeat(depth));
    out.push('}');
    out
}

fn union(parts: impl Iterator<Item = String>) -> String {
    let mut seen: Vec<String> = Vec::new();
    for part in parts {
        if !seen.contains(&part) {
            seen.push(part);
        }
    }
    match seen.len() {
        0 => UNKNOWN.to_string(),
        1 => seen.remove(0),
        _ => seen.join(" | "),
    }
}

fn string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

/// Whether `name` can appear unquoted as a property key or member name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn property_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        string_literal(name)
    }
}

/// Render `text` as a `/** */` block at `indent`, ending in a newline.
pub(crate) fn doc_comment(text: &str, indent: &str) -> String {
    let text = text.trim().replace("*/", "*\\/");
    if text.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() == 1 {
        return format!("{indent}/** {text} */\n");
    }
    let mut out = format!("{indent}/**\n");
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            out.push_str(&format!("{indent} *\n"));
        } else {
            out.push_str(&format!("{indent} * {line}\n"));
        }
    }
    out.push_str(&format!("{indent} */\n"));
    out
}
