//! deno_core ops backing the console, timer and tool bridge shims.
//!
//! Every op takes the epoch of the run that created the shim. Calls from an
//! earlier run (a timer or promise chain that outlived a timeout) are
//! ignored or rejected.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::channel::{LogLevel, SandboxMessage, ScriptError};
use crate::error::SandboxError;

/// Per-execution budget for bridge calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCallLimits {
    /// Maximum number of bridge calls.
    pub max_calls: usize,
    /// Maximum size of one call's serialized argument, in bytes.
    pub max_args_size: usize,
    /// Calls admitted so far.
    pub calls_made: usize,
}

impl ToolCallLimits {
    pub fn new(max_calls: usize, max_args_size: usize) -> Self {
        Self {
            max_calls,
            max_args_size,
            calls_made: 0,
        }
    }

    /// Counts one call with `args_len` bytes of arguments, or refuses it.
    pub fn admit(&mut self, args_len: usize) -> Result<(), SandboxError> {
        if self.calls_made >= self.max_calls {
            return Err(SandboxError::ToolCallLimit {
                max: self.max_calls,
            });
        }
        if args_len > self.max_args_size {
            return Err(SandboxError::ToolCallArgsTooLarge {
                max: self.max_args_size,
                actual: args_len,
            });
        }
        self.calls_made += 1;
        Ok(())
    }
}

/// State of the run currently owning the isolate.
pub(crate) struct ExecutionScope {
    pub epoch: u32,
    pub identifiers: HashSet<String>,
    pub limits: ToolCallLimits,
    pub events: mpsc::UnboundedSender<SandboxMessage>,
    pub finished: Option<oneshot::Sender<()>>,
    pub outcome: Option<Result<(), ScriptError>>,
}

/// Bridge calls waiting for a host reply, keyed by call id.
///
/// Ids keep increasing across runs, so a reply can only ever settle the
/// call it was produced for.
#[derive(Default)]
pub(crate) struct PendingCalls {
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Result<Value, String>>>,
}

impl PendingCalls {
    pub fn register(&mut self) -> (u64, oneshot::Receiver<Result<Value, String>>) {
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(self.next_id, tx);
        (self.next_id, rx)
    }

    /// Settles `call_id`. Returns false when nothing is waiting on it.
    pub fn resolve(&mut self, call_id: u64, result: Result<Value, String>) -> bool {
        match self.waiters.remove(&call_id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Abandons every waiter. Their promises reject as cancelled.
    pub fn clear(&mut self) {
        self.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}

/// Cancellation handles for timers still sleeping.
///
/// Clearing drops every handle, which wakes the timers and makes them
/// report that their run is over.
#[derive(Default)]
pub(crate) struct PendingTimers {
    cancels: Vec<oneshot::Sender<()>>,
}

impl PendingTimers {
    pub fn register(&mut self) -> oneshot::Receiver<()> {
        self.cancels.retain(|tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        self.cancels.push(tx);
        rx
    }

    pub fn clear(&mut self) {
        self.cancels.clear();
    }

    /// Timers that have not fired yet.
    pub fn len(&self) -> usize {
        self.cancels.iter().filter(|tx| !tx.is_closed()).count()
    }
}

fn current_scope(state: &mut OpState, epoch: u32) -> Option<&mut ExecutionScope> {
    state
        .try_borrow_mut::<ExecutionScope>()
        .filter(|scope| scope.epoch == epoch)
}

fn settle(state: &mut OpState, epoch: u32, outcome: Result<(), ScriptError>) {
    let Some(scope) = current_scope(state, epoch) else {
        return;
    };
    if scope.outcome.is_some() {
        return;
    }
    scope.outcome = Some(outcome);
    if let Some(finished) = scope.finished.take() {
        let _ = finished.send(());
    }
}

/// One console call, already formatted by the shim.
#[op2(fast)]
pub fn op_codegate_log(
    state: &mut OpState,
    #[smi] epoch: u32,
    #[smi] level: u32,
    #[string] line: &str,
) {
    match current_scope(state, epoch) {
        Some(scope) => {
            let _ = scope.events.send(SandboxMessage::LogLine {
                level: LogLevel::from_code(level),
                line: line.to_string(),
            });
        }
        None => tracing::debug!(epoch, "dropping console line from a finished run"),
    }
}

/// The wrapped function settled.
#[op2(fast)]
pub fn op_codegate_done(state: &mut OpState, #[smi] epoch: u32) {
    settle(state, epoch, Ok(()));
}

/// The wrapped function threw. `error_json` is `{name, message, stack}`.
#[op2(fast)]
pub fn op_codegate_fail(state: &mut OpState, #[smi] epoch: u32, #[string] error_json: &str) {
    let error = serde_json::from_str::<ScriptError>(error_json).unwrap_or_else(|_| ScriptError {
        name: "Error".into(),
        message: error_json.to_string(),
        stack: None,
    });
    settle(state, epoch, Err(error));
}

/// Timer backing `setTimeout`. Resolves `false` when the run that set it
/// is over, so its callback never runs in a later one.
#[op2(async)]
pub async fn op_codegate_sleep(
    op_state: Rc<RefCell<OpState>>,
    #[smi] epoch: u32,
    #[smi] millis: u32,
) -> bool {
    let cancelled = {
        let mut st = op_state.borrow_mut();
        if current_scope(&mut st, epoch).is_none() {
            return false;
        }
        st.borrow_mut::<PendingTimers>().register()
    };
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(u64::from(millis))) => true,
        _ = cancelled => false,
    }
}

/// Sends one tool call to the host and waits for its result.
#[op2(async)]
#[string]
pub async fn op_codegate_call_tool(
    op_state: Rc<RefCell<OpState>>,
    #[smi] epoch: u32,
    #[string] tool: String,
    #[string] args_json: String,
) -> Result<String, JsErrorBox> {
    let reply = {
        let mut st = op_state.borrow_mut();
        let Some(scope) = current_scope(&mut st, epoch) else {
            return Err(JsErrorBox::generic("the execution that issued this call is over"));
        };
        if !scope.identifiers.contains(&tool) {
            return Err(JsErrorBox::generic(format!("unknown tool '{tool}'")));
        }
        scope
            .limits
            .admit(args_json.len())
            .map_err(|e| JsErrorBox::generic(e.to_string()))?;
        let events = scope.events.clone();

        let args: Value = serde_json::from_str(&args_json)
            .map_err(|e| JsErrorBox::generic(format!("tool arguments are not valid JSON: {e}")))?;
        let (call_id, reply) = st.borrow_mut::<PendingCalls>().register();
        tracing::debug!(call_id, tool = %tool, args_len = args_json.len(), "bridge call dispatched");
        events
            .send(SandboxMessage::BridgeCall {
                call_id,
                tool: tool.clone(),
                args,
            })
            .map_err(|_| JsErrorBox::generic("the host stopped listening for tool calls"))?;
        reply
    };

    match reply.await {
        Ok(Ok(value)) => serde_json::to_string(&value)
            .map_err(|e| JsErrorBox::generic(format!("tool result is not serializable: {e}"))),
        Ok(Err(message)) => Err(JsErrorBox::generic(message)),
        Err(_) => Err(JsErrorBox::generic(format!(
            "tool call '{tool}' was cancelled"
        ))),
    }
}

deno_core::extension!(
    codegate_ext,
    ops = [
        op_codegate_log,
        op_codegate_done,
        op_codegate_fail,
        op_codegate_sleep,
        op_codegate_call_tool
    ],
    state = |state| {
        state.put(PendingCalls::default());
        state.put(PendingTimers::default());
    },
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_count_calls() {
        let mut limits = ToolCallLimits::new(2, 100);
        assert!(limits.admit(10).is_ok());
        assert!(limits.admit(10).is_ok());
        let err = limits.admit(10).unwrap_err();
        assert!(matches!(err, SandboxError::ToolCallLimit { max: 2 }));
        assert_eq!(limits.calls_made, 2);
    }

    #[test]
    fn oversized_args_are_not_counted() {
        let mut limits = ToolCallLimits::new(5, 8);
        let err = limits.admit(9).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::ToolCallArgsTooLarge { max: 8, actual: 9 }
        ));
        assert_eq!(limits.calls_made, 0);
    }

    #[tokio::test]
    async fn results_reach_their_own_call() {
        let mut pending = PendingCalls::default();
        let (first, first_rx) = pending.register();
        let (second, second_rx) = pending.register();
        assert_ne!(first, second);

        assert!(pending.resolve(second, Ok(serde_json::json!("two"))));
        assert!(pending.resolve(first, Err("one failed".into())));
        assert_eq!(first_rx.await.unwrap(), Err("one failed".to_string()));
        assert_eq!(second_rx.await.unwrap(), Ok(serde_json::json!("two")));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn cleared_timers_wake_cancelled() {
        let mut timers = PendingTimers::default();
        let first = timers.register();
        let second = timers.register();
        assert_eq!(timers.len(), 2);

        drop(second);
        assert_eq!(timers.len(), 1);

        timers.clear();
        assert!(first.await.is_err());
        assert_eq!(timers.len(), 0);
    }

    #[tokio::test]
    async fn late_results_are_discarded() {
        let mut pending = PendingCalls::default();
        let (stale, stale_rx) = pending.register();
        pending.clear();
        assert!(stale_rx.await.is_err());
        assert!(!pending.resolve(stale, Ok(Value::Null)));

        let (fresh, _rx) = pending.register();
        assert!(fresh > stale);
    }
}
