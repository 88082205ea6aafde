#![warn(missing_docs)]

//! # codegate
//!
//! Code mode over an external tool source: instead of calling tools one at
//! a time, a caller writes a short program against a typed tool namespace
//! and the session runs it in a sandbox.
//!
//! A [`CodeMode`] session
//! 1. fetches tool descriptors from a [`ToolSource`] and generates the
//!    namespace declaration shown to code authors,
//! 2. statically checks submitted code against that declaration,
//! 3. runs the compiled code in a V8 isolate, bridging `tools.<name>(...)`
//!    calls back to the source,
//! 4. maps runtime failures onto the submitted code's lines.
//!
//! ```no_run
//! # async fn demo(source: std::sync::Arc<dyn codegate::ToolSource>) -> Result<(), codegate::CodeModeError> {
//! use codegate::{CodeMode, CodegateConfig};
//!
//! let session = CodeMode::new(CodegateConfig::default())?;
//! let interface = session.connect(source).await?;
//! println!("{}", interface.text);
//!
//! let report = session.execute("const r = await tools.search({ q: 'rust' });\nconsole.log(r);").await?;
//! if let Some(text) = report.render_error() {
//!     eprintln!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod report;
mod session;
mod source;

pub use error::CodeModeError;
pub use report::{RunError, RunReport, Stage};
pub use session::{CodeMode, RunOptions};
pub use source::ToolSource;

pub use codegate_check::Validation;
pub use codegate_config::CodegateConfig;
pub use codegate_error::{BridgeError, Diagnostic, Severity};
pub use codegate_interface::{GeneratedInterface, ToolDescriptor};
pub use codegate_sandbox::{ErrorKind, ErrorReport, MemoryStats};
