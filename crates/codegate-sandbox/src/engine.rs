//! The engine contract shared by every execution strategy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::RunOutcome;
use crate::error::SandboxError;
use crate::ToolBridge;

/// Engine-wide defaults. Per-request [`ExecutionOptions`] override the
/// timeout and memory ceiling.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Default execution deadline.
    pub timeout: Duration,
    /// Default V8 heap ceiling in megabytes.
    pub memory_limit_mb: usize,
    /// Maximum size of submitted code in bytes.
    pub max_code_size: usize,
    /// Maximum bridge calls per execution.
    pub max_tool_calls: usize,
    /// Maximum serialized size of one call's argument in bytes.
    pub max_tool_call_args_size: usize,
    /// Name the tool namespace is bound to inside the context.
    pub namespace: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_limit_mb: 128,
            max_code_size: crate::guard::DEFAULT_MAX_CODE_SIZE,
            max_tool_calls: 50,
            max_tool_call_args_size: 1024 * 1024,
            namespace: "tools".into(),
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Deadline for this run.
    pub timeout: Option<Duration>,
    /// Heap ceiling for this run, in megabytes.
    pub memory_limit_mb: Option<usize>,
}

/// Failure class of an [`ExecutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The deadline passed, or the code can never finish.
    Timeout,
    /// The heap ceiling was exceeded and the context was torn down.
    MemoryLimit,
    /// The code threw, or failed to compile.
    Runtime,
    /// The pre-execution guard refused the code.
    Rejected,
    /// The engine itself failed.
    Internal,
}

impl ErrorKind {
    /// Resource-class failures can succeed when retried with less work.
    pub fn is_resource(self) -> bool {
        matches!(self, Self::Timeout | Self::MemoryLimit)
    }
}

/// Structured error attached to a failed [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct ExecutionError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Error constructor name as seen by the code, e.g. `TypeError`.
    pub name: String,
    /// The message, verbatim for runtime errors.
    pub message: String,
    /// Stack text with frames in submitted-code coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ExecutionError {
    fn new(kind: ErrorKind, name: &str, message: String) -> Self {
        Self {
            kind,
            name: name.to_string(),
            message,
            stack: None,
        }
    }

    pub(crate) fn timeout(timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            "TimeoutError",
            format!("execution timed out after {}ms", timeout.as_millis()),
        )
    }

    pub(crate) fn stalled() -> Self {
        Self::new(
            ErrorKind::Timeout,
            "TimeoutError",
            "execution timed out: the code is waiting on a promise that can never settle".into(),
        )
    }

    pub(crate) fn memory_limit(limit_mb: usize) -> Self {
        Self::new(
            ErrorKind::MemoryLimit,
            "RangeError",
            format!("memory limit of {limit_mb}MB exceeded; the context was reset"),
        )
    }

    pub(crate) fn rejected(err: &SandboxError) -> Self {
        Self::new(ErrorKind::Rejected, "CodeRejected", err.to_string())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "InternalError", message.into())
    }
}

/// What an engine returns for every execution, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the code ran to completion without throwing.
    pub success: bool,
    /// Captured console lines in production order.
    pub output: Vec<String>,
    /// Wall-clock time of the call, guard and start-up included.
    #[serde(rename = "elapsedTime")]
    pub elapsed_ms: u64,
    /// Present exactly when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    pub(crate) fn finish(started: Instant, output: Vec<String>, error: Option<ExecutionError>) -> Self {
        Self {
            success: error.is_none(),
            output,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error,
        }
    }

    pub(crate) fn from_outcome(
        started: Instant,
        output: Vec<String>,
        outcome: RunOutcome,
        timeout: Duration,
        limit_mb: usize,
    ) -> Self {
        let error = match outcome {
            RunOutcome::Success => None,
            RunOutcome::TimedOut => Some(ExecutionError::timeout(timeout)),
            RunOutcome::Stalled => Some(ExecutionError::stalled()),
            RunOutcome::MemoryLimit => Some(ExecutionError::memory_limit(limit_mb)),
            RunOutcome::Failed { error } => Some(ExecutionError {
                kind: ErrorKind::Runtime,
                name: error.name,
                message: error.message,
                stack: error.stack,
            }),
        };
        Self::finish(started, output, error)
    }
}

/// Heap usage of a live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes in use right now.
    pub used_bytes: usize,
    /// Largest `used_bytes` sampled since the context was created.
    pub peak_bytes: usize,
    /// The ceiling the context enforces.
    pub limit_bytes: usize,
}

/// Runs submitted code against a tool bridge.
///
/// Implementations never fail the call itself: every outcome, including
/// resource violations and engine faults, comes back as an
/// [`ExecutionResult`].
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Runs `code` as the body of an async function.
    async fn execute(
        &self,
        code: &str,
        bridge: Arc<dyn ToolBridge>,
        options: ExecutionOptions,
    ) -> ExecutionResult;

    /// Heap usage of the live context. `None` until one exists.
    async fn memory_stats(&self) -> Option<MemoryStats>;

    /// Releases the context. Idempotent; the next execution starts fresh.
    async fn dispose(&self);
}
