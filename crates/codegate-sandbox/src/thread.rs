//! The weaker alternative engine.
//!
//! Each execution gets a fresh isolate on a fresh thread, with no heap
//! ceiling. It shares the host's address space and relies on message
//! passing and forced termination alone: a program that exhausts the heap
//! brings down the whole process, and nothing survives between runs. Use
//! [`IsolateEngine`](crate::IsolateEngine) unless the ceiling is unwanted.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{
    ExecutionEngine, ExecutionError, ExecutionOptions, ExecutionResult, MemoryStats,
    SandboxConfig,
};
use crate::guard::check_code;
use crate::ops::ToolCallLimits;
use crate::worker::IsolateWorker;
use crate::ToolBridge;

/// Runs every execution on its own short-lived isolate thread.
pub struct ThreadEngine {
    config: SandboxConfig,
}

impl ThreadEngine {
    /// Creates an engine. `memory_limit_mb` only labels errors here.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for ThreadEngine {
    async fn execute(
        &self,
        code: &str,
        bridge: Arc<dyn ToolBridge>,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        tracing::info!(code_len = code.len(), engine = "thread", "execute: starting");

        if let Err(e) = check_code(code, Some(self.config.max_code_size)) {
            tracing::warn!(error = %e, "execute: code rejected");
            return ExecutionResult::finish(started, Vec::new(), Some(ExecutionError::rejected(&e)));
        }

        let worker = match IsolateWorker::spawn(None).await {
            Ok(worker) => worker,
            Err(e) => {
                tracing::error!(error = %e, "execute: thread start-up failed");
                return ExecutionResult::finish(
                    started,
                    Vec::new(),
                    Some(ExecutionError::internal(e.to_string())),
                );
            }
        };

        let limits = ToolCallLimits::new(
            self.config.max_tool_calls,
            self.config.max_tool_call_args_size,
        );
        let transcript = worker
            .run(code, &self.config.namespace, bridge, timeout, limits)
            .await;
        if transcript.lost {
            worker.abandon();
        } else {
            worker.shutdown().await;
        }

        let limit_mb = options.memory_limit_mb.unwrap_or(self.config.memory_limit_mb);
        let result = match transcript.outcome {
            Some(outcome) => {
                ExecutionResult::from_outcome(started, transcript.output, outcome, timeout, limit_mb)
            }
            None => ExecutionResult::finish(
                started,
                transcript.output,
                Some(ExecutionError::internal("execution thread exited unexpectedly")),
            ),
        };
        tracing::info!(
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            "execute: complete"
        );
        result
    }

    async fn memory_stats(&self) -> Option<MemoryStats> {
        None
    }

    async fn dispose(&self) {}
}
