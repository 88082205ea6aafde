#![warn(missing_docs)]

//! # codegate-config
//!
//! Configuration loading for codegate sessions.
//!
//! Every field is optional; anything left out falls back to the defaults
//! exposed by the accessor methods.
//!
//! ## Example
//!
//! ```toml
//! [sandbox]
//! engine = "isolate"        # or "thread"
//! timeout_ms = 30000
//! memory_limit_mb = 128
//! max_code_size = 65536
//! max_tool_calls = 50
//! max_tool_call_args_size = 1048576
//!
//! [validation]
//! enabled = true
//! namespace = "tools"
//! ```

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Default execution deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default heap ceiling.
pub const DEFAULT_MEMORY_LIMIT_MB: usize = 128;
/// Default maximum code size.
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;
/// Default bridge call budget per execution.
pub const DEFAULT_MAX_TOOL_CALLS: usize = 50;
/// Default maximum argument size per bridge call.
pub const DEFAULT_MAX_TOOL_CALL_ARGS_SIZE: usize = 1024 * 1024;
/// Default tool namespace.
pub const DEFAULT_NAMESPACE: &str = "tools";

/// Names the execution wrapper already binds.
const RESERVED_NAMESPACES: &[&str] = &[
    "__run", "console", "setTimeout", "clearTimeout", "globalThis",
];

/// Words that cannot name a `const` binding inside an async function.
const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Errors from config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An `${VAR}` reference names an unset variable.
    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which execution engine a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Persistent V8 isolate with a heap ceiling.
    #[default]
    Isolate,
    /// Fresh isolate per execution on its own thread, no heap ceiling.
    Thread,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodegateConfig {
    /// Execution settings.
    #[serde(default)]
    pub sandbox: SandboxSection,

    /// Static validation settings.
    #[serde(default)]
    pub validation: ValidationSection,
}

/// `[sandbox]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxSection {
    /// `"isolate"` or `"thread"`.
    #[serde(default)]
    pub engine: Option<String>,

    /// Execution deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// V8 heap ceiling in megabytes.
    #[serde(default)]
    pub memory_limit_mb: Option<usize>,

    /// Maximum size of submitted code in bytes.
    #[serde(default)]
    pub max_code_size: Option<usize>,

    /// Maximum bridge calls per execution.
    #[serde(default)]
    pub max_tool_calls: Option<usize>,

    /// Maximum serialized argument size per bridge call, in bytes.
    #[serde(default)]
    pub max_tool_call_args_size: Option<usize>,
}

/// `[validation]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSection {
    /// Validate code before every execution.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Name of the tool namespace in generated interfaces and at runtime.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: None,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

impl CodegateConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CodegateConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str)?;
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding `${VAR}` references.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// The configured engine.
    pub fn engine(&self) -> EngineKind {
        match self.sandbox.engine.as_deref() {
            Some("thread") => EngineKind::Thread,
            _ => EngineKind::Isolate,
        }
    }

    /// Execution deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Heap ceiling in megabytes.
    pub fn memory_limit_mb(&self) -> usize {
        self.sandbox.memory_limit_mb.unwrap_or(DEFAULT_MEMORY_LIMIT_MB)
    }

    /// Maximum code size in bytes.
    pub fn max_code_size(&self) -> usize {
        self.sandbox.max_code_size.unwrap_or(DEFAULT_MAX_CODE_SIZE)
    }

    /// Bridge call budget per execution.
    pub fn max_tool_calls(&self) -> usize {
        self.sandbox.max_tool_calls.unwrap_or(DEFAULT_MAX_TOOL_CALLS)
    }

    /// Maximum argument size per bridge call.
    pub fn max_tool_call_args_size(&self) -> usize {
        self.sandbox
            .max_tool_call_args_size
            .unwrap_or(DEFAULT_MAX_TOOL_CALL_ARGS_SIZE)
    }

    /// Whether code is validated before it runs.
    pub fn validate_before_run(&self) -> bool {
        self.validation.enabled
    }

    /// Tool namespace name.
    pub fn namespace(&self) -> &str {
        self.validation.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Check field values. The loaders call this; configs built in code
    /// should too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(engine) = self.sandbox.engine.as_deref() {
            if engine != "isolate" && engine != "thread" {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.engine: unsupported engine '{engine}', supported: isolate, thread"
                )));
            }
        }
        if self.sandbox.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("sandbox.timeout_ms must be greater than 0".into()));
        }
        if self.sandbox.memory_limit_mb == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.memory_limit_mb must be greater than 0".into(),
            ));
        }
        if self.sandbox.max_code_size == Some(0) {
            return Err(ConfigError::Invalid("sandbox.max_code_size must be greater than 0".into()));
        }
        if let Some(ns) = self.validation.namespace.as_deref() {
            if !IDENTIFIER.is_match(ns) {
                return Err(ConfigError::Invalid(format!(
                    "validation.namespace: '{ns}' is not a valid identifier"
                )));
            }
            if RESERVED_WORDS.contains(&ns) {
                return Err(ConfigError::Invalid(format!(
                    "validation.namespace: '{ns}' is a reserved word"
                )));
            }
            if RESERVED_NAMESPACES.contains(&ns) {
                return Err(ConfigError::Invalid(format!(
                    "validation.namespace: '{ns}' is already bound inside the sandbox"
                )));
            }
        }
        Ok(())
    }
}

/// Replace `${VAR}` references with the variable's value.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in ENV_REF.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .map_err(|_| ConfigError::MissingEnv(name.as_str().to_string()))?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}
