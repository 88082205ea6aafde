//! What a session returns for every execution.

use codegate_error::Diagnostic;
use codegate_sandbox::{ErrorKind, ErrorReport, ExecutionResult};
use serde::Serialize;

/// Where in the pipeline a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Static checks refused the code; it never ran.
    Validation,
    /// The code ran and failed.
    Execution,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    /// Stage that produced the failure.
    pub stage: Stage,
    /// Engine failure class. `None` for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    /// One-line summary.
    pub message: String,
    /// Located problems, in submitted-code coordinates.
    pub diagnostics: Vec<Diagnostic>,
    /// Full mapping of a runtime failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ErrorReport>,
    /// Whether retrying or correcting the code can succeed.
    pub recoverable: bool,
}

/// Outcome of [`CodeMode::execute`](crate::CodeMode::execute).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Whether the code ran to completion.
    pub success: bool,
    /// Captured console lines in production order.
    pub output: Vec<String>,
    /// Wall-clock time of the execution. Zero when validation refused it.
    #[serde(rename = "elapsedTime")]
    pub elapsed_ms: u64,
    /// Present exactly when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunReport {
    pub(crate) fn refused(errors: Vec<Diagnostic>) -> Self {
        let message = match errors.as_slice() {
            [] => "validation failed".to_string(),
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
        };
        Self {
            success: false,
            output: Vec::new(),
            elapsed_ms: 0,
            error: Some(RunError {
                stage: Stage::Validation,
                kind: None,
                message,
                diagnostics: errors,
                report: None,
                recoverable: false,
            }),
        }
    }

    pub(crate) fn executed(result: ExecutionResult, report: Option<ErrorReport>, code: &str) -> Self {
        let error = result.error.map(|err| {
            let diagnostics = report
                .as_ref()
                .map(|r| vec![r.to_diagnostic(code)])
                .unwrap_or_default();
            let recoverable = report
                .as_ref()
                .map_or(err.kind.is_resource(), |r| r.recoverable);
            RunError {
                stage: Stage::Execution,
                kind: Some(err.kind),
                message: err.to_string(),
                diagnostics,
                report,
                recoverable,
            }
        });
        Self {
            success: result.success,
            output: result.output,
            elapsed_ms: result.elapsed_ms,
            error,
        }
    }

    /// Human-readable failure text, if the run failed.
    pub fn render_error(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if let Some(report) = &error.report {
            return Some(report.render());
        }
        let mut out = error.message.clone();
        for diagnostic in &error.diagnostics {
            out.push_str(&format!("\n  {diagnostic}"));
            for suggestion in &diagnostic.suggestions {
                out.push_str(&format!("\n    - {suggestion}"));
            }
        }
        Some(out)
    }
}
