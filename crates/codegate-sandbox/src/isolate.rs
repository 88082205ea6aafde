//! The default engine: one long-lived V8 isolate with a heap ceiling.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::engine::{
    ExecutionEngine, ExecutionError, ExecutionOptions, ExecutionResult, MemoryStats,
    SandboxConfig,
};
use crate::guard::check_code;
use crate::ops::ToolCallLimits;
use crate::worker::IsolateWorker;
use crate::ToolBridge;

/// Runs code in a persistent isolate created on first use.
///
/// Executions are serialized: a second call waits until the first one has
/// produced its result. A timeout leaves the isolate in place; a heap
/// violation tears it down and the next call starts a fresh one. A request
/// with a different memory ceiling also gets a fresh isolate.
pub struct IsolateEngine {
    config: SandboxConfig,
    worker: Mutex<Option<IsolateWorker>>,
}

impl IsolateEngine {
    /// Creates an engine. No isolate exists until the first execution.
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
        }
    }

    /// The engine's defaults.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for IsolateEngine {
    async fn execute(
        &self,
        code: &str,
        bridge: Arc<dyn ToolBridge>,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let limit_mb = options.memory_limit_mb.unwrap_or(self.config.memory_limit_mb);
        tracing::info!(code_len = code.len(), limit_mb, engine = "isolate", "execute: starting");

        if let Err(e) = check_code(code, Some(self.config.max_code_size)) {
            tracing::warn!(error = %e, "execute: code rejected");
            return ExecutionResult::finish(started, Vec::new(), Some(ExecutionError::rejected(&e)));
        }

        let mut slot = self.worker.lock().await;
        let stale = slot
            .as_ref()
            .is_some_and(|w| !w.is_alive() || w.heap_limit_mb() != Some(limit_mb));
        if stale {
            if let Some(old) = slot.take() {
                tracing::debug!("execute: replacing isolate");
                old.shutdown().await;
            }
        }
        if slot.is_none() {
            match IsolateWorker::spawn(Some(limit_mb)).await {
                Ok(worker) => *slot = Some(worker),
                Err(e) => {
                    tracing::error!(error = %e, "execute: isolate start-up failed");
                    return ExecutionResult::finish(
                        started,
                        Vec::new(),
                        Some(ExecutionError::internal(e.to_string())),
                    );
                }
            }
        }
        let Some(worker) = slot.as_ref() else {
            return ExecutionResult::finish(
                started,
                Vec::new(),
                Some(ExecutionError::internal("isolate is not available")),
            );
        };

        let limits = ToolCallLimits::new(
            self.config.max_tool_calls,
            self.config.max_tool_call_args_size,
        );
        let transcript = worker
            .run(code, &self.config.namespace, bridge, timeout, limits)
            .await;

        if transcript.lost {
            if let Some(old) = slot.take() {
                old.abandon();
            }
        }

        let result = match transcript.outcome {
            Some(outcome) => {
                ExecutionResult::from_outcome(started, transcript.output, outcome, timeout, limit_mb)
            }
            None => ExecutionResult::finish(
                started,
                transcript.output,
                Some(ExecutionError::internal("isolate exited unexpectedly")),
            ),
        };
        tracing::info!(
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            lines = result.output.len(),
            "execute: complete"
        );
        result
    }

    async fn memory_stats(&self) -> Option<MemoryStats> {
        let slot = self.worker.lock().await;
        slot.as_ref()?.stats().await
    }

    async fn dispose(&self) {
        let mut slot = self.worker.lock().await;
        if let Some(worker) = slot.take() {
            tracing::debug!("dispose: shutting down isolate");
            worker.shutdown().await;
        }
    }
}
