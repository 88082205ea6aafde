//! Tool usage scan over compiled code.

use std::collections::BTreeSet;

use codegate_error::Diagnostic;
use regex::Regex;

/// Collect every identifier called as `<namespace>.<identifier>(` in `code`.
///
/// Fails with one diagnostic per identifier not in `known`, located at its
/// first call. Comments and strings are scanned too.
pub fn check_tool_usage<'k>(
    code: &str,
    namespace: &str,
    known: impl IntoIterator<Item = &'k str>,
) -> Result<BTreeSet<String>, Vec<Diagnostic>> {
    let known: Vec<&str> = known.into_iter().collect();
    let pattern = format!(r"\b{}\s*\.\s*([A-Za-z_$][\w$]*)\s*\(", regex::escape(namespace));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            return Err(vec![Diagnostic::error(format!(
                "invalid tool namespace '{namespace}': {e}"
            ))])
        }
    };

    let mut used = BTreeSet::new();
    let mut errors = Vec::new();
    for caps in re.captures_iter(code) {
        let Some(ident) = caps.get(1) else {
            continue;
        };
        let name = ident.as_str();
        if !used.insert(name.to_string()) || known.contains(&name) {
            continue;
        }
        let (line, column) = position(code, ident.start());
        let mut diag = Diagnostic::error(format!(
            "Unknown tool '{name}': it is not declared on '{namespace}'."
        ))
        .at(line, column, code);
        if let Some(hint) = codegate_error::suggest_similar(name, &known) {
            diag = diag.with_suggestion(hint);
        }
        if !known.is_empty() {
            diag = diag.with_suggestion(format!("Available tools: {}", known.join(", ")));
        }
        errors.push(diag);
    }

    if errors.is_empty() {
        Ok(used)
    } else {
        tracing::warn!(unknown = errors.len(), "code references undeclared tools");
        Err(errors)
    }
}

/// 1-indexed line and column of a byte offset.
pub(crate) fn position(code: &str, offset: usize) -> (u32, u32) {
    let before = code.get(..offset).unwrap_or(code);
    let line = before.matches('\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() as u32 + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_declared_identifiers() {
        let code = "const a = await tools.search({});\nawait tools . ping ();";
        let used = check_tool_usage(code, "tools", ["search", "ping"]).unwrap();
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec!["ping", "search"]);
    }

    #[test]
    fn rejects_undeclared_identifier_with_location() {
        let code = "const a = 1;\nawait tools.serch({ q: 1 });";
        let errors = check_tool_usage(code, "tools", ["search", "ping"]).unwrap_err();
        assert_eq!(errors.len(), 1);
        let e = &errors[0];
        assert!(e.message.contains("'serch'"));
        assert_eq!((e.line, e.column), (Some(2), Some(13)));
        assert_eq!(e.source.as_deref(), Some("await tools.serch({ q: 1 });"));
        assert_eq!(e.suggestions[0], "Did you mean 'search'?");
    }

    #[test]
    fn other_objects_are_ignored() {
        let code = "mytools.nope(); tools2.x(); obj.call();";
        assert!(check_tool_usage(code, "tools", []).unwrap().is_empty());
    }

    #[test]
    fn reports_each_unknown_identifier_once() {
        let code = "tools.a(); tools.a(); tools.b();";
        let errors = check_tool_usage(code, "tools", []).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
