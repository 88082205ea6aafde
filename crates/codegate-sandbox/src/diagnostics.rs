//! Turns a failed execution into a located, annotated report.

use std::fmt::Write as _;
use std::sync::LazyLock;

use codegate_error::{closest_match, Diagnostic};
use regex::Regex;
use serde::Serialize;

use crate::engine::{ErrorKind, ExecutionError};
use crate::runtime::USER_CODE_FILE;

/// Lines of context shown on each side of the error line.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Stack lines kept in the rendered report.
const RENDERED_STACK_LINES: usize = 6;

static FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s()]+):(\d+):(\d+)\)?\s*$").unwrap());

static NOT_DEFINED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_$][\w$]*) is not defined").unwrap());

static NOT_A_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w$.]+?)\.([A-Za-z_$][\w$]*) is not a function").unwrap());

static INTERFACE_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s+([A-Za-z_$][\w$]*)\s*\(\s*input\??\s*:").unwrap());

/// Broad category of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The code does not parse.
    Syntax,
    /// A value had the wrong shape (`TypeError`).
    Type,
    /// A name resolved to nothing (`ReferenceError`).
    Reference,
    /// A value was out of range (`RangeError`).
    Range,
    /// The deadline passed.
    Timeout,
    /// The heap ceiling was exceeded.
    Memory,
    /// A tool call was rejected by the bridge.
    Bridge,
    /// Anything else, including guard rejections.
    Other,
}

impl ErrorClass {
    fn of(error: &ExecutionError) -> Self {
        match error.kind {
            ErrorKind::Timeout => return Self::Timeout,
            ErrorKind::MemoryLimit => return Self::Memory,
            ErrorKind::Rejected | ErrorKind::Internal => return Self::Other,
            ErrorKind::Runtime => {}
        }
        if error.message.starts_with("tool call '") && error.message.contains("' failed:") {
            return Self::Bridge;
        }
        match error.name.as_str() {
            "SyntaxError" => Self::Syntax,
            "TypeError" => Self::Type,
            "ReferenceError" => Self::Reference,
            "RangeError" => Self::Range,
            _ => Self::Other,
        }
    }

    /// Whether resubmitting (adjusted code or input) can succeed.
    pub fn recoverable(self) -> bool {
        match self {
            Self::Syntax => false,
            Self::Timeout | Self::Memory => true,
            Self::Type | Self::Reference => true,
            Self::Range | Self::Bridge | Self::Other => false,
        }
    }
}

/// A 1-indexed position in the submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// 1-indexed line.
    pub line: u32,
    /// 1-indexed column.
    pub column: u32,
}

/// One line of the context window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextLine {
    /// 1-indexed line number.
    pub number: u32,
    /// The line, verbatim.
    pub text: String,
    /// Whether this is the line the error points at.
    pub is_error: bool,
}

/// A runtime failure placed back into the submitted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Error constructor name.
    pub name: String,
    /// Error message.
    pub message: String,
    /// Broad category.
    pub class: ErrorClass,
    /// Where the error was raised, if a frame points into the code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// The exact source line at `location`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<String>,
    /// Lines around `location`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextLine>,
    /// Ordered hints.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Whether correcting or retrying can succeed.
    pub recoverable: bool,
    /// Stack text, in submitted-code coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorReport {
    /// The report as a single error diagnostic.
    pub fn to_diagnostic(&self, code: &str) -> Diagnostic {
        let mut diagnostic = Diagnostic::error(format!("{}: {}", self.name, self.message));
        if let Some(loc) = self.location {
            diagnostic = diagnostic.at(loc.line, loc.column, code);
        }
        for suggestion in &self.suggestions {
            diagnostic = diagnostic.with_suggestion(suggestion.clone());
        }
        diagnostic
    }

    /// Multi-section, human-readable rendering.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}\n", self.name, self.message);

        if let Some(loc) = self.location {
            let _ = writeln!(out, "\n  at line {}, column {}", loc.line, loc.column);
        }

        if !self.context.is_empty() {
            let width = self
                .context
                .last()
                .map_or(1, |l| l.number.to_string().len());
            out.push('\n');
            for line in &self.context {
                let marker = if line.is_error { '>' } else { ' ' };
                let _ = writeln!(out, "  {marker} {:>width$} | {}", line.number, line.text);
                if let (true, Some(loc)) = (line.is_error, self.location) {
                    let pad = " ".repeat(loc.column.saturating_sub(1) as usize);
                    let _ = writeln!(out, "    {:>width$} | {pad}^", "");
                }
            }
        }

        if !self.suggestions.is_empty() {
            out.push_str("\nSuggestions:\n");
            for suggestion in &self.suggestions {
                let _ = writeln!(out, "  - {suggestion}");
            }
        }

        if let Some(stack) = &self.stack {
            let frames: Vec<&str> = stack
                .lines()
                .skip(1)
                .take(RENDERED_STACK_LINES)
                .collect();
            if !frames.is_empty() {
                out.push_str("\nStack:\n");
                for frame in frames {
                    let _ = writeln!(out, "  {}", frame.trim());
                }
            }
        }

        out
    }
}

/// Maps execution errors back onto the submitted code.
#[derive(Debug, Clone)]
pub struct DiagnosticMapper {
    context_lines: usize,
    namespace: String,
}

impl Default for DiagnosticMapper {
    fn default() -> Self {
        Self::new("tools")
    }
}

impl DiagnosticMapper {
    /// A mapper for code that reaches tools through `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            context_lines: DEFAULT_CONTEXT_LINES,
            namespace: namespace.into(),
        }
    }

    /// Overrides the context window size.
    pub fn with_context_lines(mut self, context_lines: usize) -> Self {
        self.context_lines = context_lines;
        self
    }

    /// Builds a report for `error` raised by `code`.
    ///
    /// `interface` is the generated interface text; when present, unknown
    /// tool names are matched against the tools it declares.
    pub fn map_error(
        &self,
        error: &ExecutionError,
        code: &str,
        interface: Option<&str>,
    ) -> ErrorReport {
        let lines: Vec<&str> = code.lines().collect();
        let class = ErrorClass::of(error);
        let location = error
            .stack
            .as_deref()
            .and_then(|stack| locate(stack, lines.len()));
        let source_line = location
            .and_then(|loc| lines.get(loc.line as usize - 1))
            .map(|line| (*line).to_string());
        let context = location
            .map(|loc| self.context_window(&lines, loc.line))
            .unwrap_or_default();
        let tools = interface.map(declared_tools).unwrap_or_default();
        let suggestions = self.suggest(error, class, source_line.as_deref(), &tools);

        ErrorReport {
            name: error.name.clone(),
            message: error.message.clone(),
            class,
            location,
            source_line,
            context,
            suggestions,
            recoverable: class.recoverable(),
            stack: error.stack.clone(),
        }
    }

    fn context_window(&self, lines: &[&str], error_line: u32) -> Vec<ContextLine> {
        let index = error_line as usize - 1;
        let first = index.saturating_sub(self.context_lines);
        let last = (index + self.context_lines).min(lines.len().saturating_sub(1));
        (first..=last)
            .map(|i| ContextLine {
                number: i as u32 + 1,
                text: lines[i].to_string(),
                is_error: i == index,
            })
            .collect()
    }

    fn suggest(
        &self,
        error: &ExecutionError,
        class: ErrorClass,
        source_line: Option<&str>,
        tools: &[&str],
    ) -> Vec<String> {
        let ns = &self.namespace;
        let message = error.message.as_str();
        let mut out = Vec::new();

        match class {
            ErrorClass::Timeout => out.push(
                "Reduce the work done in one run: fewer tool calls, smaller inputs, or bounded loops."
                    .to_string(),
            ),
            ErrorClass::Memory => out.push(
                "Reduce memory use: process results incrementally instead of accumulating large arrays or strings."
                    .to_string(),
            ),
            ErrorClass::Bridge => {
                out.push("Check the arguments passed to the tool against its input type.".to_string());
                out.push("The tool source may be unavailable; retry once it is reachable.".to_string());
            }
            _ => {}
        }

        if message.contains("is not a function") {
            match NOT_A_FUNCTION.captures(message) {
                Some(caps) if &caps[1] == ns => {
                    let name = &caps[2];
                    out.push(format!("'{name}' is not a tool declared on '{ns}'."));
                    if let Some(m) = closest_match(name, tools) {
                        out.push(format!("Did you mean '{ns}.{m}'?"));
                    }
                }
                _ => {
                    out.push("Check that the value being called is a function and that its name is spelled correctly.".to_string());
                    out.push("If the value comes from a tool call, make sure the call was awaited.".to_string());
                }
            }
        } else if message.to_ascii_lowercase().starts_with("cannot read") {
            out.push("Guard against null or undefined before reading properties, e.g. value?.field.".to_string());
        } else if message.contains("is not iterable") {
            out.push("Verify the value is an array (Array.isArray) before iterating; tool results are objects and the list may be in a property.".to_string());
        } else if let Some(caps) = NOT_DEFINED.captures(message) {
            let name = &caps[1];
            if tools.contains(&name) {
                out.push(format!("'{name}' is a tool; call it as {ns}.{name}(...)."));
            } else if source_line.is_some_and(|line| line.contains(&format!("{ns}."))) {
                out.push(format!("'{name}' is not a recognized tool or variable; check the tools declared on '{ns}'."));
            } else {
                out.push(format!("Check '{name}' for typos; it is not declared in this scope."));
                if let Some(m) = closest_match(name, tools) {
                    out.push(format!("Did you mean '{ns}.{m}'?"));
                }
            }
        }

        if let Some(line) = source_line {
            if calls_tool_without_await(line, ns) {
                out.push(format!(
                    "This line calls a tool on '{ns}' without 'await'; did you forget to await it?"
                ));
            }
        }

        out
    }
}

/// Finds the first user-code frame inside the code's line range.
fn locate(stack: &str, line_count: usize) -> Option<SourceLocation> {
    stack.lines().skip(1).find_map(|frame| {
        let caps = FRAME.captures(frame)?;
        if &caps[1] != USER_CODE_FILE {
            return None;
        }
        let line: u32 = caps[2].parse().ok()?;
        let column: u32 = caps[3].parse().ok()?;
        (line >= 1 && line as usize <= line_count).then_some(SourceLocation { line, column })
    })
}

/// Tool identifiers declared in a generated interface.
fn declared_tools(interface: &str) -> Vec<&str> {
    INTERFACE_MEMBER
        .captures_iter(interface)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Whether `line` calls `ns.<tool>(` with no `await` in front of it.
fn calls_tool_without_await(line: &str, ns: &str) -> bool {
    let Ok(call) = Regex::new(&format!(r"\b{}\s*\.\s*[A-Za-z_$][\w$]*\s*\(", regex::escape(ns)))
    else {
        return false;
    };
    let Some(found) = call.find(line) else {
        return false;
    };
    let before = &line[..found.start()];
    !(before.contains("await") || before.contains("Promise.") || line.contains(".then("))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACE: &str = "declare const tools: {\n  /** Search */\n  search_music(input: SearchMusicInput): Promise<SearchMusicOutput>;\n  list_albums(input?: ListAlbumsInput): Promise<ListAlbumsOutput>;\n};\n";

    fn runtime(name: &str, message: &str, stack: &str) -> ExecutionError {
        ExecutionError {
            kind: ErrorKind::Runtime,
            name: name.into(),
            message: message.into(),
            stack: Some(stack.into()),
        }
    }

    #[test]
    fn locates_first_user_frame() {
        let code = "const a = 1;\nconst b = a.c.d;\nconsole.log(b);";
        let err = runtime(
            "TypeError",
            "Cannot read properties of undefined (reading 'd')",
            "TypeError: Cannot read properties of undefined (reading 'd')\n    at <wrapper>:1:40\n    at <user-code>:2:15\n    at <user-code>:9:1",
        );
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        assert_eq!(report.location, Some(SourceLocation { line: 2, column: 15 }));
        assert_eq!(report.source_line.as_deref(), Some("const b = a.c.d;"));
        assert_eq!(report.class, ErrorClass::Type);
        assert!(report.recoverable);
        assert!(report.suggestions[0].contains("null or undefined"));
    }

    #[test]
    fn frames_past_the_code_are_ignored() {
        let err = runtime("Error", "x", "Error: x\n    at <user-code>:40:1");
        let report = DiagnosticMapper::default().map_error(&err, "throw 1;", None);
        assert!(report.location.is_none());
        assert!(report.context.is_empty());
    }

    #[test]
    fn named_frames_are_located() {
        let code = "async function go() {\n  throw new Error('nope');\n}\nawait go();";
        let err = runtime("Error", "nope", "Error: nope\n    at go (<user-code>:2:9)\n    at <user-code>:4:7");
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        assert_eq!(report.location, Some(SourceLocation { line: 2, column: 9 }));
        assert_eq!(report.source_line.as_deref(), Some("  throw new Error('nope');"));
        assert!(!report.recoverable);
    }

    #[test]
    fn context_window_is_clamped() {
        let code = (1..=10).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
        let err = runtime("Error", "x", "Error: x\n    at <user-code>:2:1");
        let report = DiagnosticMapper::default().map_error(&err, &code, None);
        let numbers: Vec<u32> = report.context.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(report.context[1].is_error);
        assert!(!report.context[0].is_error);

        let narrow = DiagnosticMapper::default().with_context_lines(1);
        let err = runtime("Error", "x", "Error: x\n    at <user-code>:10:1");
        let numbers: Vec<u32> = narrow
            .map_error(&err, &code, None)
            .context
            .iter()
            .map(|l| l.number)
            .collect();
        assert_eq!(numbers, vec![9, 10]);
    }

    #[test]
    fn unknown_tool_member_is_flagged() {
        let err = runtime(
            "TypeError",
            "tools.serch_music is not a function",
            "TypeError: tools.serch_music is not a function\n    at <user-code>:1:13",
        );
        let report = DiagnosticMapper::default().map_error(
            &err,
            "const r = await tools.serch_music({});",
            Some(INTERFACE),
        );
        assert_eq!(
            report.suggestions,
            vec![
                "'serch_music' is not a tool declared on 'tools'.".to_string(),
                "Did you mean 'tools.search_music'?".to_string(),
            ]
        );
    }

    #[test]
    fn bare_tool_name_is_pointed_at_namespace() {
        let err = runtime(
            "ReferenceError",
            "list_albums is not defined",
            "ReferenceError: list_albums is not defined\n    at <user-code>:1:7",
        );
        let report = DiagnosticMapper::default().map_error(&err, "await list_albums();", Some(INTERFACE));
        assert_eq!(report.class, ErrorClass::Reference);
        assert_eq!(
            report.suggestions[0],
            "'list_albums' is a tool; call it as tools.list_albums(...)."
        );
    }

    #[test]
    fn typo_in_local_name() {
        let err = runtime(
            "ReferenceError",
            "reslt is not defined",
            "ReferenceError: reslt is not defined\n    at <user-code>:2:13",
        );
        let report = DiagnosticMapper::default().map_error(&err, "const result = 1;\nconsole.log(reslt);", None);
        assert_eq!(
            report.suggestions,
            vec!["Check 'reslt' for typos; it is not declared in this scope.".to_string()]
        );
    }

    #[test]
    fn missing_await_hint() {
        let err = runtime(
            "TypeError",
            "r.items is not iterable",
            "TypeError: r.items is not iterable\n    at <user-code>:2:21",
        );
        let code = "const r = tools.search_music({ query: 'x' });\nfor (const item of r.items) {}";
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        assert!(report.suggestions[0].contains("Array.isArray"));

        let err = runtime(
            "TypeError",
            "Cannot read properties of undefined (reading 'length')",
            "TypeError: Cannot read properties of undefined (reading 'length')\n    at <user-code>:1:52",
        );
        let code = "const n = tools.search_music({ query: 'x' }).items.length;";
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("did you forget to await")));
    }

    #[test]
    fn awaited_call_gets_no_await_hint() {
        assert!(!calls_tool_without_await("const r = await tools.x({});", "tools"));
        assert!(calls_tool_without_await("const r = tools.x({});", "tools"));
        assert!(!calls_tool_without_await("tools.x({}).then(log);", "tools"));
        assert!(!calls_tool_without_await("const a = 1;", "tools"));
    }

    #[test]
    fn resource_errors_are_recoverable() {
        let err = ExecutionError::timeout(std::time::Duration::from_millis(100));
        let report = DiagnosticMapper::default().map_error(&err, "while (true) {}", None);
        assert_eq!(report.class, ErrorClass::Timeout);
        assert!(report.recoverable);
        assert!(report.suggestions[0].starts_with("Reduce the work"));

        let err = ExecutionError::memory_limit(32);
        let report = DiagnosticMapper::default().map_error(&err, "const a = [];", None);
        assert_eq!(report.class, ErrorClass::Memory);
        assert!(report.recoverable);
    }

    #[test]
    fn syntax_errors_are_not_recoverable() {
        let err = runtime("SyntaxError", "Unexpected token ')'", "SyntaxError: Unexpected token ')'");
        let report = DiagnosticMapper::default().map_error(&err, "foo(;", None);
        assert_eq!(report.class, ErrorClass::Syntax);
        assert!(!report.recoverable);
    }

    #[test]
    fn bridge_failures_are_classified() {
        let err = runtime(
            "Error",
            "tool call 'search_music' failed: rate limited",
            "Error: tool call 'search_music' failed: rate limited\n    at <user-code>:1:11",
        );
        let report = DiagnosticMapper::default().map_error(&err, "const r = await tools.search_music({});", None);
        assert_eq!(report.class, ErrorClass::Bridge);
        assert_eq!(report.suggestions.len(), 2);
        assert!(report.suggestions[0].contains("arguments"));
    }

    #[test]
    fn render_has_all_sections() {
        let code = "const a = null;\nconsole.log(a.b);";
        let err = runtime(
            "TypeError",
            "Cannot read properties of null (reading 'b')",
            "TypeError: Cannot read properties of null (reading 'b')\n    at <user-code>:2:15",
        );
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        let text = report.render();
        assert!(text.starts_with("TypeError: Cannot read properties of null (reading 'b')\n"));
        assert!(text.contains("at line 2, column 15"));
        assert!(text.contains("  > 2 | console.log(a.b);"));
        assert!(text.contains("      |               ^"));
        assert!(text.contains("Suggestions:\n  - Guard against null"));
        assert!(text.contains("Stack:\n  at <user-code>:2:15"));
    }

    #[test]
    fn diagnostic_carries_location_and_suggestions() {
        let code = "const a = null;\n  console.log(a.b);";
        let err = runtime(
            "TypeError",
            "Cannot read properties of null (reading 'b')",
            "TypeError: Cannot read properties of null (reading 'b')\n    at <user-code>:2:17",
        );
        let report = DiagnosticMapper::default().map_error(&err, code, None);
        let diagnostic = report.to_diagnostic(code);
        assert_eq!(diagnostic.line, Some(2));
        assert_eq!(diagnostic.column, Some(17));
        assert_eq!(diagnostic.source.as_deref(), Some("console.log(a.b);"));
        assert_eq!(diagnostic.suggestions.len(), 1);
    }
}
