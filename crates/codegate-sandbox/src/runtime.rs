//! The isolate side: a `JsRuntime` living on its own thread, running one
//! wrapped script at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use regex::{Captures, Regex};
use tokio::sync::{mpsc, oneshot};

use crate::channel::{HostMessage, IsolateCommand, RunOutcome, RunRequest, SandboxMessage, ScriptError};
use crate::engine::MemoryStats;
use crate::error::SandboxError;
use crate::ops::{codegate_ext, ExecutionScope, PendingCalls, PendingTimers};

/// Script name of the wrapped user code, as it appears in V8 stack frames.
const RUN_SCRIPT: &str = "[codegate:run]";

/// File name user-code frames are rewritten to.
pub const USER_CODE_FILE: &str = "<user-code>";

/// Lines the wrapper adds before the first line of user code.
const PREAMBLE_LINES: usize = 1;

/// Extra heap granted once the ceiling is hit, so termination can unwind.
const HEAP_GRACE_BYTES: usize = 1024 * 1024;

/// Installed once per isolate. Exposes `__codegate.scope(epoch, ids)`, which
/// builds the console, timers and tool namespace for one run.
const BOOTSTRAP: &str = r#"((core) => {
  const ops = core.ops;
  const log = ops.op_codegate_log;
  const done = ops.op_codegate_done;
  const fail = ops.op_codegate_fail;
  const sleep = ops.op_codegate_sleep;
  const callTool = ops.op_codegate_call_tool;
  const STALE = ["the execution that issued this call is over", "was cancelled"];

  const format = (value) => {
    if (value === null) return "null";
    if (value === undefined) return "undefined";
    try {
      if (value instanceof Error) return `${value.name}: ${value.message}`;
      if (typeof value === "object") {
        const json = JSON.stringify(value);
        return json === undefined ? String(value) : json;
      }
      return String(value);
    } catch {
      return "[Unserializable object]";
    }
  };
  const line = (args) => args.map(format).join(" ");

  const describe = (error) => {
    if (error instanceof Error) {
      return JSON.stringify({
        name: String(error.name),
        message: String(error.message),
        stack: typeof error.stack === "string" ? error.stack : null,
      });
    }
    return JSON.stringify({ name: "Error", message: format(error), stack: null });
  };

  let active = null;

  if (typeof core.setUnhandledPromiseRejectionHandler === "function") {
    core.setUnhandledPromiseRejectionHandler((_promise, reason) => {
      const message = reason instanceof Error ? String(reason.message) : "";
      if (active !== null && !STALE.some((s) => message.includes(s))) {
        active.fail(reason);
      }
      return true;
    });
  }

  const scope = (epoch, identifiers) => {
    const timers = new Set();
    const finish = () => {
      timers.clear();
      if (active !== null && active.epoch === epoch) active = null;
    };
    const run = Object.freeze({
      epoch,
      done: () => {
        finish();
        done(epoch);
      },
      fail: (error) => {
        finish();
        fail(epoch, describe(error));
      },
    });
    active = run;

    const emit = (level) => (...args) => log(epoch, level, line(args));
    const console = Object.freeze({
      log: emit(0),
      info: emit(0),
      debug: emit(0),
      warn: emit(1),
      error: emit(2),
    });

    const tools = Object.create(null);
    for (const id of identifiers) {
      tools[id] = async (input) => {
        const args = JSON.stringify(input === undefined ? {} : input);
        return JSON.parse(await callTool(epoch, id, args === undefined ? "{}" : args));
      };
    }

    let nextTimer = 0;
    const setTimeout = (callback, delay, ...args) => {
      const id = ++nextTimer;
      timers.add(id);
      const ms = Math.min(Math.max(Math.trunc(Number(delay)) || 0, 0), 2147483647);
      sleep(epoch, ms).then((live) => {
        if (!live || active !== run || !timers.delete(id)) return;
        if (typeof callback !== "function") return;
        try {
          callback(...args);
        } catch (error) {
          run.fail(error);
        }
      });
      return id;
    };
    const clearTimeout = (id) => {
      timers.delete(id);
    };

    return Object.freeze({
      console,
      tools: Object.freeze(tools),
      setTimeout,
      clearTimeout,
      done: run.done,
      fail: run.fail,
    });
  };

  const idle = () => {
    active = null;
  };

  Object.defineProperty(globalThis, "__codegate", { value: Object.freeze({ scope, idle }) });

  // The core console prints to the host's stdout. Route it to the active run.
  const capture = (level) => (...args) => {
    if (active !== null) log(active.epoch, level, line(args));
  };
  Object.defineProperty(globalThis, "console", {
    value: Object.freeze({
      log: capture(0),
      info: capture(0),
      debug: capture(0),
      warn: capture(1),
      error: capture(2),
    }),
    writable: false,
    configurable: false,
    enumerable: false,
  });

  delete globalThis.__bootstrap;
  delete globalThis.Deno;
  delete globalThis.eval;
  const AsyncFunction = (async function () {}).constructor;
  const GeneratorFunction = (function* () {}).constructor;
  for (const proto of [Function.prototype, AsyncFunction.prototype, GeneratorFunction.prototype]) {
    Object.defineProperty(proto, "constructor", {
      value: undefined,
      configurable: false,
      writable: false,
    });
  }
})(Deno.core);"#;

static RUN_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[codegate:run\]:(\d+):(\d+)").unwrap());

/// Wraps user code as the body of an immediately-invoked async function.
///
/// The preamble occupies exactly [`PREAMBLE_LINES`] line, so user line `n`
/// is script line `n + 1` and columns are unchanged.
pub(crate) fn wrap(
    code: &str,
    namespace: &str,
    epoch: u32,
    identifiers: &[String],
) -> Result<String, serde_json::Error> {
    let ids = serde_json::to_string(identifiers)?;
    Ok(format!(
        "(async () => {{ const __run = globalThis.__codegate.scope({epoch}, {ids}); \
         const {{ console, setTimeout, clearTimeout }} = __run; const {namespace} = __run.tools; \
         try {{ await (async () => {{\n{code}\n}})(); __run.done(); }} \
         catch (__error) {{ __run.fail(__error); }} }})();"
    ))
}

/// Rewrites `[codegate:run]:L:C` frames into user-code coordinates.
///
/// Frames outside the user's lines point into the wrapper and are renamed
/// accordingly.
pub(crate) fn to_user_coordinates(text: &str, user_lines: usize) -> String {
    RUN_FRAME
        .replace_all(text, |caps: &Captures| {
            let line: usize = caps[1].parse().unwrap_or(0);
            let column = &caps[2];
            if line > PREAMBLE_LINES && line <= PREAMBLE_LINES + user_lines {
                format!("{USER_CODE_FILE}:{}:{column}", line - PREAMBLE_LINES)
            } else {
                format!("<wrapper>:{line}:{column}")
            }
        })
        .into_owned()
}

fn is_error_name(name: &str) -> bool {
    name.ends_with("Error") && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Builds a [`ScriptError`] from an error that escaped the wrapper, such as
/// a compile error or an exception reported by the event loop.
pub(crate) fn parse_uncaught(text: &str, user_lines: usize) -> ScriptError {
    let text = to_user_coordinates(text, user_lines);
    let mut lines = text.lines();
    let head = lines.next().unwrap_or_default();
    let head = head.strip_prefix("Uncaught ").unwrap_or(head);
    let head = head.strip_prefix("(in promise) ").unwrap_or(head);
    let (name, message) = match head.split_once(": ") {
        Some((name, message)) if is_error_name(name) => (name, message),
        _ => ("Error", head),
    };
    let frames: Vec<&str> = lines.collect();
    let stack = (!frames.is_empty()).then(|| format!("{name}: {message}\n{}", frames.join("\n")));
    ScriptError {
        name: name.to_string(),
        message: message.to_string(),
        stack,
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates execution the first time the ceiling is reached and grants a
/// little headroom for the termination to unwind.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` is the boxed HeapLimitState owned by the SandboxIsolate
    // that registered this callback. The runtime field is dropped before the
    // box, so the pointer is valid whenever V8 can call back.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + HEAP_GRACE_BYTES
}

/// Whether the isolate can take another run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Reusable,
    Poisoned,
}

/// Why the event loop stopped being driven.
enum LoopEnd {
    Finished,
    Drained,
    Error(String),
    Deadline,
}

/// A bootstrapped runtime plus its limit bookkeeping.
///
/// Field order matters: the runtime must drop before `heap_state`.
struct SandboxIsolate {
    runtime: JsRuntime,
    heap_state: Option<Box<HeapLimitState>>,
    heap_limit_bytes: Option<usize>,
    peak_bytes: usize,
    epoch: u32,
}

impl SandboxIsolate {
    fn new(heap_limit_mb: Option<usize>) -> Result<Self, SandboxError> {
        let heap_limit_bytes = heap_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024));
        let create_params = heap_limit_bytes.map(|max| v8::CreateParams::default().heap_limits(0, max));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![codegate_ext::init_ops_and_esm()],
            create_params,
            ..Default::default()
        });

        let heap_state = heap_limit_bytes.map(|_| {
            let state = Box::new(HeapLimitState {
                handle: runtime.v8_isolate().thread_safe_handle(),
                triggered: AtomicBool::new(false),
            });
            runtime.v8_isolate().add_near_heap_limit_callback(
                near_heap_limit_callback,
                &*state as *const HeapLimitState as *mut std::ffi::c_void,
            );
            state
        });

        runtime
            .execute_script("[codegate:bootstrap]", BOOTSTRAP)
            .map_err(|e| SandboxError::Startup(anyhow::anyhow!("bootstrap failed: {e}")))?;

        Ok(Self {
            runtime,
            heap_state,
            heap_limit_bytes,
            peak_bytes: 0,
            epoch: 0,
        })
    }

    fn handle(&mut self) -> v8::IsolateHandle {
        self.runtime.v8_isolate().thread_safe_handle()
    }

    fn heap_triggered(&self) -> bool {
        self.heap_state
            .as_ref()
            .is_some_and(|state| state.triggered.load(Ordering::SeqCst))
    }

    async fn run(&mut self, request: RunRequest) -> Fate {
        let RunRequest {
            code,
            namespace,
            identifiers,
            timeout,
            limits,
            events,
            mut replies,
        } = request;
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let user_lines = code.lines().count().max(1);
        tracing::debug!(epoch, code_len = code.len(), "isolate: run starting");

        let (finished_tx, mut finished_rx) = oneshot::channel();
        self.runtime.op_state().borrow_mut().put(ExecutionScope {
            epoch,
            identifiers: identifiers.iter().cloned().collect(),
            limits,
            events: events.clone(),
            finished: Some(finished_tx),
            outcome: None,
        });

        let timed_out = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
        let watchdog = {
            let handle = self.handle();
            let timed_out = Arc::clone(&timed_out);
            std::thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                    timed_out.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                }
            })
        };

        let end = match wrap(&code, &namespace, epoch, &identifiers) {
            Ok(script) => match self.runtime.execute_script(RUN_SCRIPT, script) {
                Ok(_) => self.drive(&mut finished_rx, &mut replies, timeout).await,
                Err(e) => LoopEnd::Error(e.to_string()),
            },
            Err(e) => LoopEnd::Error(format!("InternalError: {e}")),
        };

        let _ = cancel_tx.send(());
        let _ = watchdog.join();
        self.runtime.v8_isolate().cancel_terminate_execution();

        let settled = self
            .runtime
            .op_state()
            .borrow_mut()
            .try_take::<ExecutionScope>()
            .and_then(|scope| scope.outcome);

        let heap_hit = self.heap_triggered();
        let outcome = if timed_out.load(Ordering::SeqCst) || matches!(end, LoopEnd::Deadline) {
            RunOutcome::TimedOut
        } else if heap_hit {
            RunOutcome::MemoryLimit
        } else {
            match (settled, end) {
                (Some(Ok(())), _) => RunOutcome::Success,
                (Some(Err(mut error)), _) => {
                    error.stack = error.stack.map(|s| to_user_coordinates(&s, user_lines));
                    RunOutcome::Failed { error }
                }
                (None, LoopEnd::Error(text)) => RunOutcome::Failed {
                    error: parse_uncaught(&text, user_lines),
                },
                (None, LoopEnd::Drained) => RunOutcome::Stalled,
                (None, _) => RunOutcome::Failed {
                    error: ScriptError {
                        name: "InternalError".into(),
                        message: "execution finished without reporting an outcome".into(),
                        stack: None,
                    },
                },
            }
        };

        let fate = if heap_hit {
            Fate::Poisoned
        } else {
            self.settle_leftovers().await;
            self.sample_memory();
            Fate::Reusable
        };

        tracing::debug!(epoch, ?outcome, "isolate: run finished");
        let _ = events.send(SandboxMessage::Completed { outcome });
        fate
    }

    /// Polls the event loop until the run completes, the loop drains or
    /// the deadline passes, delivering bridge results as they arrive.
    async fn drive(
        &mut self,
        finished: &mut oneshot::Receiver<()>,
        replies: &mut mpsc::UnboundedReceiver<HostMessage>,
        timeout: Duration,
    ) -> LoopEnd {
        let op_state = self.runtime.op_state();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let event_loop = self.runtime.run_event_loop(PollEventLoopOptions::default());
        tokio::pin!(event_loop);
        let mut host_open = true;

        loop {
            tokio::select! {
                _ = &mut *finished => return LoopEnd::Finished,
                result = &mut event_loop => {
                    return match result {
                        Ok(()) => LoopEnd::Drained,
                        Err(e) => LoopEnd::Error(e.to_string()),
                    };
                }
                msg = replies.recv(), if host_open => match msg {
                    Some(HostMessage::BridgeResult { call_id, result }) => {
                        let delivered = op_state
                            .borrow_mut()
                            .borrow_mut::<PendingCalls>()
                            .resolve(call_id, result);
                        if !delivered {
                            tracing::debug!(call_id, "discarding bridge result with no waiter");
                        }
                    }
                    None => host_open = false,
                },
                _ = &mut deadline => return LoopEnd::Deadline,
            }
        }
    }

    /// Detaches whatever the finished run left behind. Pending bridge calls
    /// are abandoned and sleeping timers cancelled; the resulting settlements
    /// are flushed while no run is active, so they cannot surface in the
    /// next one or keep its event loop alive.
    async fn settle_leftovers(&mut self) {
        if let Err(e) = self
            .runtime
            .execute_script("[codegate:idle]", "globalThis.__codegate.idle();")
        {
            tracing::warn!(error = %e, "isolate: failed to mark idle");
        }
        let (abandoned, timers) = {
            let op_state = self.runtime.op_state();
            let mut st = op_state.borrow_mut();
            let pending = st.borrow_mut::<PendingCalls>();
            let calls = pending.len();
            pending.clear();
            let sleeping = st.borrow_mut::<PendingTimers>();
            let timers = sleeping.len();
            sleeping.clear();
            (calls, timers)
        };
        if abandoned > 0 || timers > 0 {
            tracing::debug!(abandoned, timers, "isolate: detached leftovers of the finished run");
        }
        let flush = self.runtime.run_event_loop(PollEventLoopOptions::default());
        if let Ok(Err(e)) = tokio::time::timeout(Duration::ZERO, flush).await {
            tracing::debug!(error = %e, "isolate: leftover error after run");
        }
    }

    fn sample_memory(&mut self) -> MemoryStats {
        let mut stats = v8::HeapStatistics::default();
        self.runtime.v8_isolate().get_heap_statistics(&mut stats);
        let used = stats.used_heap_size();
        self.peak_bytes = self.peak_bytes.max(used);
        MemoryStats {
            used_bytes: used,
            peak_bytes: self.peak_bytes,
            limit_bytes: self.heap_limit_bytes.unwrap_or_else(|| stats.heap_size_limit()),
        }
    }
}

/// Body of the isolate thread.
///
/// Reports the isolate handle (or the start-up failure) through `ready`,
/// then serves commands until shutdown, channel close, or a heap violation.
pub(crate) fn isolate_main(
    heap_limit_mb: Option<usize>,
    ready: oneshot::Sender<Result<v8::IsolateHandle, SandboxError>>,
    mut commands: mpsc::UnboundedReceiver<IsolateCommand>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(SandboxError::Startup(e.into())));
            return;
        }
    };

    rt.block_on(async move {
        let mut isolate = match SandboxIsolate::new(heap_limit_mb) {
            Ok(isolate) => isolate,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(isolate.handle())).is_err() {
            return;
        }
        tracing::debug!(heap_limit_mb, "isolate: ready");

        while let Some(command) = commands.recv().await {
            match command {
                IsolateCommand::Run(request) => {
                    if isolate.run(*request).await == Fate::Poisoned {
                        tracing::warn!(heap_limit_mb, "isolate: heap limit exceeded, tearing down");
                        break;
                    }
                }
                IsolateCommand::Stats(reply) => {
                    let _ = reply.send(isolate.sample_memory());
                }
                IsolateCommand::Shutdown => break,
            }
        }
        tracing::debug!("isolate: stopped");
    });
}
