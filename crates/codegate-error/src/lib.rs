//! Typed error types shared by the codegate crates.
//!
//! Provides [`BridgeError`], the canonical error for tool bridge calls, and
//! the [`Diagnostic`] model used by both the static validator and the
//! runtime error mapper.

mod diagnostic;

pub use diagnostic::{Diagnostic, Severity};

use thiserror::Error;

/// Canonical error type for a tool invocation crossing the bridge.
///
/// Marked `#[non_exhaustive]` so tool sources can grow new failure modes
/// without breaking downstream matches.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// No tool with this identifier exists in the current tool set.
    #[error("unknown tool '{tool}'")]
    ToolNotFound {
        /// The identifier that was requested.
        tool: String,
    },

    /// The tool source rejected or failed the call.
    #[error("tool '{tool}' failed: {message}")]
    Upstream {
        /// The tool that failed.
        tool: String,
        /// The error message reported by the tool source.
        message: String,
    },

    /// The tool source did not answer in time.
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The tool that timed out.
        tool: String,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The arguments could not be accepted (wrong shape, too large).
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        /// The tool the arguments were meant for.
        tool: String,
        /// Why the arguments were refused.
        reason: String,
    },

    /// The connection to the tool source is gone.
    #[error("tool source disconnected: {0}")]
    Disconnected(String),

    /// Catch-all for unexpected failures.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::Disconnected(_) => "DISCONNECTED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the call may succeed if retried unchanged.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Upstream { .. } | Self::Disconnected(_) => true,
            Self::ToolNotFound { .. } | Self::InvalidArguments { .. } | Self::Internal(_) => false,
        }
    }

    /// Convert to a structured JSON error object.
    ///
    /// `known_tools` enables a fuzzy `suggested_fix` for [`BridgeError::ToolNotFound`].
    pub fn to_structured_error(&self, known_tools: Option<&[&str]>) -> serde_json::Value {
        let suggested_fix = match self {
            Self::ToolNotFound { tool } => known_tools.and_then(|known| suggest_similar(tool, known)),
            Self::InvalidArguments { .. } => {
                Some("Check the arguments against the tool's input type".to_string())
            }
            Self::Timeout { .. } => Some("Retry with a simpler operation".to_string()),
            Self::Disconnected(_) => Some("Reconnect to the tool source".to_string()),
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix);
        }

        obj
    }
}

/// Find the closest known name within Levenshtein distance 3.
///
/// Returns `"Did you mean '<name>'?"` for the best match, preferring the
/// earliest candidate on ties.
pub fn suggest_similar(name: &str, known: &[&str]) -> Option<String> {
    closest_match(name, known).map(|m| format!("Did you mean '{m}'?"))
}

/// Returns the known name closest to `name`, if any is within distance 3.
pub fn closest_match<'a>(name: &str, known: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(usize, &str)> = None;
    for &candidate in known {
        if candidate == name {
            continue;
        }
        let dist = strsim::levenshtein(name, candidate);
        if dist <= 3 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, m)| m)
}

// BridgeError crosses task and thread boundaries.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<BridgeError>();
};
