//! Host side of a run: turns isolate messages into output lines and
//! bridge calls, and sends bridge results back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::channel::{HostMessage, RunOutcome, SandboxMessage};
use crate::redact::bridge_failure;
use crate::ToolBridge;

/// Serves one run until the isolate reports completion.
///
/// Bridge calls are started as they arrive and may finish in any order;
/// each result goes back under the id of the call that produced it.
/// Returns `None` if the isolate side disappeared without completing.
pub(crate) async fn relay(
    events: &mut mpsc::UnboundedReceiver<SandboxMessage>,
    replies: &mpsc::UnboundedSender<HostMessage>,
    bridge: &Arc<dyn ToolBridge>,
    output: &mut Vec<String>,
) -> Option<RunOutcome> {
    let identifiers = bridge.identifiers();
    let known: Vec<&str> = identifiers.iter().map(String::as_str).collect();
    let mut calls = JoinSet::new();
    loop {
        tokio::select! {
            msg = events.recv() => match msg? {
                SandboxMessage::LogLine { level, line } => output.push(level.render(&line)),
                SandboxMessage::BridgeCall { call_id, tool, args } => {
                    tracing::debug!(call_id, tool = %tool, "bridge call received");
                    let bridge = Arc::clone(bridge);
                    calls.spawn(async move {
                        let result = bridge.call_tool(&tool, args).await;
                        (call_id, tool, result)
                    });
                }
                SandboxMessage::Completed { outcome } => return Some(outcome),
            },
            Some(joined) = calls.join_next(), if !calls.is_empty() => match joined {
                Ok((call_id, tool, result)) => {
                    let result = result.map_err(|e| {
                        tracing::debug!(call_id, tool = %tool, code = e.code(), "bridge call failed");
                        bridge_failure(&tool, &e, &known)
                    });
                    if replies.send(HostMessage::BridgeResult { call_id, result }).is_err() {
                        tracing::debug!(call_id, "isolate stopped listening for bridge results");
                    }
                }
                Err(e) => tracing::error!(error = %e, "bridge call task failed"),
            },
        }
    }
}
