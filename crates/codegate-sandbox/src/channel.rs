//! Messages crossing the isolation boundary.
//!
//! The isolate thread and the host talk only through these tagged variants:
//! log lines and bridge calls flow out, bridge results flow in. Nothing else
//! is shared between the two sides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::engine::MemoryStats;
use crate::ops::ToolCallLimits;

/// Severity of a captured console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `console.log`, `console.info`, `console.debug`.
    Log,
    /// `console.warn`.
    Warn,
    /// `console.error`.
    Error,
}

impl LogLevel {
    /// Decodes the level code passed by the console shim.
    pub(crate) fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Warn,
            2 => Self::Error,
            _ => Self::Log,
        }
    }

    /// Renders a captured line with its level prefix.
    pub fn render(self, line: &str) -> String {
        match self {
            Self::Log => line.to_string(),
            Self::Warn => format!("WARN: {line}"),
            Self::Error => format!("ERROR: {line}"),
        }
    }
}

/// An error raised by user code, as reported from inside the isolate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    /// Constructor name, e.g. `TypeError`.
    pub name: String,
    /// The error message.
    pub message: String,
    /// Stack text with frames expressed in submitted-code coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// How a run ended, as seen from the isolate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The wrapped function settled normally.
    Success,
    /// The wrapped function threw or failed to compile.
    Failed {
        /// What was thrown.
        error: ScriptError,
    },
    /// The deadline passed and execution was terminated.
    TimedOut,
    /// Nothing was left to run but the code had not finished.
    Stalled,
    /// The heap ceiling was hit. The isolate is gone after this.
    MemoryLimit,
}

/// Messages sent from the isolate to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxMessage {
    /// One console call.
    LogLine {
        /// Which console entry point produced it.
        level: LogLevel,
        /// Arguments formatted and joined by a single space.
        line: String,
    },
    /// A tool invocation awaiting a [`HostMessage::BridgeResult`].
    BridgeCall {
        /// Correlates the result with the pending promise.
        call_id: u64,
        /// Sanitized tool identifier.
        tool: String,
        /// The single argument object.
        args: Value,
    },
    /// The run is over. Always the last message of a run.
    Completed {
        /// How it ended.
        outcome: RunOutcome,
    },
}

/// Messages sent from the host to the isolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Settles the pending call with the same `call_id`.
    BridgeResult {
        /// The id from the matching [`SandboxMessage::BridgeCall`].
        call_id: u64,
        /// The tool result, or the (already redacted) failure message.
        result: Result<Value, String>,
    },
}

/// One run handed to the isolate thread.
pub(crate) struct RunRequest {
    pub code: String,
    pub namespace: String,
    pub identifiers: Vec<String>,
    pub timeout: Duration,
    pub limits: ToolCallLimits,
    pub events: mpsc::UnboundedSender<SandboxMessage>,
    pub replies: mpsc::UnboundedReceiver<HostMessage>,
}

/// Control messages for the isolate thread.
pub(crate) enum IsolateCommand {
    Run(Box<RunRequest>),
    Stats(oneshot::Sender<MemoryStats>),
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_prefixes() {
        assert_eq!(LogLevel::Log.render("a b"), "a b");
        assert_eq!(LogLevel::Warn.render("careful"), "WARN: careful");
        assert_eq!(LogLevel::Error.render("boom"), "ERROR: boom");
    }

    #[test]
    fn unknown_level_codes_are_plain_logs() {
        assert_eq!(LogLevel::from_code(0), LogLevel::Log);
        assert_eq!(LogLevel::from_code(2), LogLevel::Error);
        assert_eq!(LogLevel::from_code(99), LogLevel::Log);
    }

    #[test]
    fn messages_are_tagged() {
        let call = SandboxMessage::BridgeCall {
            call_id: 7,
            tool: "search".into(),
            args: serde_json::json!({ "q": "x" }),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "bridge_call");
        assert_eq!(json["call_id"], 7);

        let done = SandboxMessage::Completed {
            outcome: RunOutcome::Failed {
                error: ScriptError {
                    name: "TypeError".into(),
                    message: "x is not a function".into(),
                    stack: None,
                },
            },
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["outcome"]["status"], "failed");
        assert!(json["outcome"]["error"].get("stack").is_none());
    }

    #[test]
    fn bridge_result_keeps_error_side() {
        let msg = HostMessage::BridgeResult {
            call_id: 3,
            result: Err("tool call 'x' failed: nope".into()),
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: HostMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
