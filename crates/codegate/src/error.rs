//! Errors raised by a [`CodeMode`](crate::CodeMode) session itself.
//!
//! Execution failures are never errors here: they come back as data in a
//! [`RunReport`](crate::RunReport).

use codegate_config::ConfigError;
use codegate_error::BridgeError;
use thiserror::Error;

/// A precondition of a session call did not hold.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodeModeError {
    /// The session has no tool source. Call `connect` first.
    #[error("not connected to a tool source")]
    NotConnected,

    /// The tool source could not list its tools.
    #[error("failed to list tools: {0}")]
    ToolListing(#[source] BridgeError),

    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
