#![warn(missing_docs)]

//! # codegate-sandbox
//!
//! Runs submitted tool code in a V8 isolate and maps its failures back onto
//! the code.
//!
//! The code is wrapped as the body of an async function and evaluated with
//! no filesystem, network or environment access. It reaches the outside
//! world through exactly one channel: the tool namespace, whose calls travel
//! as [`SandboxMessage::BridgeCall`]s to a host-side [`ToolBridge`] and come
//! back as [`HostMessage::BridgeResult`]s. Console output travels the same
//! way as [`SandboxMessage::LogLine`]s.
//!
//! ## Limits
//!
//! - **Time**: a watchdog terminates execution at the deadline; CPU-bound
//!   loops included. The isolate survives a timeout.
//! - **Memory**: the heap ceiling terminates execution and the isolate is
//!   torn down; the next run gets a fresh one.
//! - **Bridge**: per-run caps on call count and argument size.
//! - **Guard**: empty, oversized and obviously escaping code never reaches V8.

pub mod channel;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod guard;
mod host;
mod isolate;
mod ops;
pub mod redact;
mod runtime;
mod thread;
mod worker;

pub use channel::{HostMessage, LogLevel, RunOutcome, SandboxMessage, ScriptError};
pub use diagnostics::{ContextLine, DiagnosticMapper, ErrorClass, ErrorReport, SourceLocation};
pub use engine::{
    ErrorKind, ExecutionEngine, ExecutionError, ExecutionOptions, ExecutionResult, MemoryStats,
    SandboxConfig,
};
pub use error::SandboxError;
pub use isolate::IsolateEngine;
pub use ops::ToolCallLimits;
pub use runtime::USER_CODE_FILE;
pub use thread::ThreadEngine;

/// Host-side handler for tool calls made by sandboxed code.
///
/// The sandbox only ever sees sanitized identifiers; mapping them back to
/// the tool source's own names is the implementation's job.
#[async_trait::async_trait]
pub trait ToolBridge: Send + Sync {
    /// The identifiers to expose on the tool namespace.
    fn identifiers(&self) -> Vec<String>;

    /// Invokes the tool behind `identifier` with a single argument object.
    async fn call_tool(
        &self,
        identifier: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, codegate_error::BridgeError>;
}
