use serde::{Deserialize, Serialize};

/// Severity of a [`Diagnostic`], mirroring the checker's message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks execution.
    Error,
    /// Reported but does not block execution on its own.
    Warning,
    /// A possible improvement.
    Suggestion,
    /// Informational message.
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// A located message about submitted code.
///
/// `line` and `column` are 1-indexed and relative to the code as submitted,
/// never to any wrapper or preamble the host adds around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// How serious the problem is.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// 1-indexed line in the submitted code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-indexed column in the submitted code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// The offending source line, trimmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ordered hints for fixing the problem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    /// An error-severity diagnostic with no location.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line: None,
            column: None,
            source: None,
            suggestions: Vec::new(),
        }
    }

    /// Attach a 1-indexed position and the trimmed source line it points at.
    pub fn at(mut self, line: u32, column: u32, code: &str) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self.source = code
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .map(|l| l.trim().to_string());
        self
    }

    /// Append a suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Whether this diagnostic blocks execution.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{}:{}: {}: {}", line, col, self.severity, self.message),
            _ => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_captures_trimmed_line() {
        let code = "const a = 1;\n    tools.nope({});\n";
        let d = Diagnostic::error("bad").at(2, 5, code);
        assert_eq!(d.source.as_deref(), Some("tools.nope({});"));
        assert_eq!(d.to_string(), "2:5: error: bad");
    }

    #[test]
    fn at_past_end_has_no_source() {
        let d = Diagnostic::error("bad").at(9, 1, "one line");
        assert_eq!(d.line, Some(9));
        assert!(d.source.is_none());
    }

    #[test]
    fn serializes_camel_case_and_skips_empty() {
        let d = Diagnostic::error("boom").with_suggestion("try again");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["suggestions"][0], "try again");
        assert!(json.get("line").is_none());
    }
}
