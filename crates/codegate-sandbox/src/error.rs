//! Error types for the codegate sandbox.

use thiserror::Error;

/// Errors raised by the sandbox outside of user code itself.
///
/// Failures thrown *by* the submitted code are not errors at this level;
/// they come back as an [`ExecutionError`](crate::ExecutionError) inside a
/// normal result.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Code failed a pre-execution check.
    #[error("code rejected: {reason}")]
    Rejected {
        /// What went wrong.
        reason: String,
    },

    /// Code exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// A banned code pattern was detected.
    #[error("banned pattern detected: `{pattern}`. Tool code has no module, runtime or filesystem access; use the tool namespace to reach external services.")]
    BannedPattern {
        /// The pattern that was matched.
        pattern: String,
    },

    /// Too many tool calls in a single execution.
    #[error("tool call limit exceeded (max {max} calls per execution)")]
    ToolCallLimit {
        /// Maximum allowed tool calls.
        max: usize,
    },

    /// Tool call arguments exceed the configured maximum size.
    #[error("tool call arguments too large (max {max} bytes, got {actual})")]
    ToolCallArgsTooLarge {
        /// Maximum allowed argument size.
        max: usize,
        /// Actual argument size.
        actual: usize,
    },

    /// The isolate could not be created or bootstrapped.
    #[error("failed to start isolate: {0}")]
    Startup(#[source] anyhow::Error),

    /// The isolate thread went away while the host was talking to it.
    #[error("isolate channel closed")]
    ChannelClosed,

    /// JSON crossing the bridge could not be encoded or decoded.
    #[error("bridge serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
