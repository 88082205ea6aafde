//! Host-side handle to an isolate thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use deno_core::v8;
use tokio::sync::{mpsc, oneshot};

use crate::channel::{IsolateCommand, RunOutcome, RunRequest};
use crate::engine::MemoryStats;
use crate::error::SandboxError;
use crate::host::relay;
use crate::ops::ToolCallLimits;
use crate::runtime::isolate_main;
use crate::ToolBridge;

/// How long the host waits past the deadline for the isolate to report.
const HOST_GRACE: Duration = Duration::from_secs(2);

/// Everything the host learned from one run.
pub(crate) struct Transcript {
    pub output: Vec<String>,
    /// `None` if the isolate vanished without reporting.
    pub outcome: Option<RunOutcome>,
    /// The isolate cannot be used again.
    pub lost: bool,
}

/// A running isolate thread and the means to talk to it.
pub(crate) struct IsolateWorker {
    commands: mpsc::UnboundedSender<IsolateCommand>,
    handle: v8::IsolateHandle,
    heap_limit_mb: Option<usize>,
    thread: Option<JoinHandle<()>>,
}

impl IsolateWorker {
    /// Starts a thread with a fresh, bootstrapped isolate.
    ///
    /// `heap_limit_mb` of `None` leaves V8's default heap in place and
    /// installs no ceiling.
    pub async fn spawn(heap_limit_mb: Option<usize>) -> Result<Self, SandboxError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("codegate-isolate".into())
            .spawn(move || isolate_main(heap_limit_mb, ready_tx, commands_rx))
            .map_err(|e| SandboxError::Startup(e.into()))?;

        let handle = ready_rx.await.map_err(|_| {
            SandboxError::Startup(anyhow::anyhow!("isolate thread exited during start-up"))
        })??;

        Ok(Self {
            commands,
            handle,
            heap_limit_mb,
            thread: Some(thread),
        })
    }

    pub fn heap_limit_mb(&self) -> Option<usize> {
        self.heap_limit_mb
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Runs `code` and serves its bridge calls until the isolate reports.
    pub async fn run(
        &self,
        code: &str,
        namespace: &str,
        bridge: Arc<dyn ToolBridge>,
        timeout: Duration,
        limits: ToolCallLimits,
    ) -> Transcript {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let request = RunRequest {
            code: code.to_string(),
            namespace: namespace.to_string(),
            identifiers: bridge.identifiers(),
            timeout,
            limits,
            events: events_tx,
            replies: replies_rx,
        };

        let mut output = Vec::new();
        if self.commands.send(IsolateCommand::Run(Box::new(request))).is_err() {
            return Transcript {
                output,
                outcome: None,
                lost: true,
            };
        }

        let served = tokio::time::timeout(
            timeout + HOST_GRACE,
            relay(&mut events_rx, &replies_tx, &bridge, &mut output),
        )
        .await;

        match served {
            Ok(Some(outcome)) => {
                let lost = matches!(outcome, RunOutcome::MemoryLimit);
                Transcript {
                    output,
                    outcome: Some(outcome),
                    lost,
                }
            }
            Ok(None) => Transcript {
                output,
                outcome: None,
                lost: true,
            },
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "isolate missed its deadline, abandoning it"
                );
                self.handle.terminate_execution();
                Transcript {
                    output,
                    outcome: Some(RunOutcome::TimedOut),
                    lost: true,
                }
            }
        }
    }

    /// Samples heap usage. `None` if the thread is gone.
    pub async fn stats(&self) -> Option<MemoryStats> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(IsolateCommand::Stats(tx)).ok()?;
        rx.await.ok()
    }

    /// Stops the thread and waits for the isolate to be dropped.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(IsolateCommand::Shutdown);
        self.handle.terminate_execution();
        if let Some(thread) = self.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                tracing::warn!("isolate thread could not be joined");
            }
        }
    }

    /// Lets go of an isolate that may be wedged. The thread exits on its
    /// own once execution unwinds and the command channel is closed.
    pub fn abandon(mut self) {
        self.handle.terminate_execution();
        self.thread.take();
    }
}
