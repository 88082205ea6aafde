//! The connect → interface → validate → execute → map pipeline.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use codegate_check::{Validation, Validator};
use codegate_config::{CodegateConfig, EngineKind};
use codegate_interface::{GeneratedInterface, InterfaceGenerator, LiveInterface};
use codegate_sandbox::{
    DiagnosticMapper, ExecutionEngine, ExecutionOptions, IsolateEngine, MemoryStats,
    SandboxConfig, ThreadEngine,
};

use crate::error::CodeModeError;
use crate::report::RunReport;
use crate::source::{SourceBridge, ToolSource};

/// Per-request overrides for [`CodeMode::execute_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Deadline for this run.
    pub timeout: Option<Duration>,
    /// Heap ceiling for this run, in megabytes.
    pub memory_limit_mb: Option<usize>,
    /// Validate before running. `None` follows `validation.enabled`.
    pub validate: Option<bool>,
}

impl RunOptions {
    fn execution(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: self.timeout,
            memory_limit_mb: self.memory_limit_mb,
        }
    }
}

struct Connection {
    source: Arc<dyn ToolSource>,
    interface: LiveInterface,
}

/// A code mode session over one tool source.
///
/// Owns its configuration, engine and interface. Executions against one
/// session are serialized by the engine; validation and interface reads
/// are lock-free.
pub struct CodeMode {
    config: CodegateConfig,
    engine: Arc<dyn ExecutionEngine>,
    validator: Validator,
    mapper: DiagnosticMapper,
    connection: ArcSwapOption<Connection>,
}

impl CodeMode {
    /// A session with the engine `config` selects.
    pub fn new(config: CodegateConfig) -> Result<Self, CodeModeError> {
        config.validate()?;
        let sandbox = sandbox_config(&config);
        let engine: Arc<dyn ExecutionEngine> = match config.engine() {
            EngineKind::Isolate => Arc::new(IsolateEngine::new(sandbox)),
            EngineKind::Thread => Arc::new(ThreadEngine::new(sandbox)),
        };
        Ok(Self::with_engine(config, engine))
    }

    /// A session running code on a caller-supplied engine.
    pub fn with_engine(config: CodegateConfig, engine: Arc<dyn ExecutionEngine>) -> Self {
        let namespace = config.namespace().to_string();
        Self {
            validator: Validator::new(namespace.clone()),
            mapper: DiagnosticMapper::new(namespace),
            engine,
            config,
            connection: ArcSwapOption::empty(),
        }
    }

    /// The session's configuration.
    pub fn config(&self) -> &CodegateConfig {
        &self.config
    }

    /// Whether a tool source is attached.
    pub fn is_connected(&self) -> bool {
        self.connection.load().is_some()
    }

    /// Attaches `source`, fetches its tools and builds the interface.
    ///
    /// Replaces any previous source. On failure the session is left as it
    /// was.
    pub async fn connect(
        &self,
        source: Arc<dyn ToolSource>,
    ) -> Result<Arc<GeneratedInterface>, CodeModeError> {
        let tools = source.list_tools().await.map_err(CodeModeError::ToolListing)?;
        let interface = LiveInterface::new(InterfaceGenerator::new(self.config.namespace()), &tools);
        let current = interface.current();
        tracing::info!(tools = tools.len(), "connected to tool source");
        self.connection.store(Some(Arc::new(Connection { source, interface })));
        Ok(current)
    }

    /// Detaches the tool source. Executions started earlier finish against
    /// it.
    pub fn disconnect(&self) {
        if self.connection.swap(None).is_some() {
            tracing::info!("disconnected from tool source");
        }
    }

    /// Re-fetches tool descriptors and swaps in a rebuilt interface.
    ///
    /// Returns whether the interface text changed.
    pub async fn refresh(&self) -> Result<bool, CodeModeError> {
        let connection = self.connection()?;
        let tools = connection
            .source
            .list_tools()
            .await
            .map_err(CodeModeError::ToolListing)?;
        Ok(connection.interface.update(&tools))
    }

    /// The current generated interface.
    pub fn interface(&self) -> Result<Arc<GeneratedInterface>, CodeModeError> {
        Ok(self.connection()?.interface.current())
    }

    /// Checks `code` against the current interface without running it.
    pub fn validate(&self, code: &str) -> Result<Validation, CodeModeError> {
        let interface = self.interface()?;
        Ok(self.validator.validate(code, &interface.text))
    }

    /// Runs `code` with the configured limits.
    pub async fn execute(&self, code: &str) -> Result<RunReport, CodeModeError> {
        self.execute_with(code, RunOptions::default()).await
    }

    /// Runs `code` with per-request overrides.
    ///
    /// Only a missing connection is an `Err`; everything that goes wrong
    /// with the code itself is reported in the [`RunReport`].
    pub async fn execute_with(
        &self,
        code: &str,
        options: RunOptions,
    ) -> Result<RunReport, CodeModeError> {
        let connection = self.connection()?;
        let interface = connection.interface.current();
        tracing::info!(code_len = code.len(), "execute: starting");

        let validate = options.validate.unwrap_or(self.config.validate_before_run());
        let compiled = if validate {
            let validation = self.validator.validate(code, &interface.text);
            match validation.output {
                Some(output) if validation.success => output,
                _ => {
                    tracing::info!(errors = validation.errors.len(), "execute: refused by validation");
                    return Ok(RunReport::refused(validation.errors));
                }
            }
        } else {
            code.to_string()
        };

        if let Err(errors) = self
            .validator
            .check_usage(&compiled, interface.index.identifiers())
        {
            return Ok(RunReport::refused(errors));
        }

        let bridge = Arc::new(SourceBridge::new(
            Arc::clone(&connection.source),
            Arc::clone(&interface),
        ));
        let result = self.engine.execute(&compiled, bridge, options.execution()).await;
        let report = result
            .error
            .as_ref()
            .map(|err| self.mapper.map_error(err, code, Some(&interface.text)));

        match &result.error {
            None => tracing::info!(elapsed_ms = result.elapsed_ms, "execute: complete"),
            Some(err) => tracing::warn!(
                elapsed_ms = result.elapsed_ms,
                kind = ?err.kind,
                error = %err,
                "execute: failed"
            ),
        }
        Ok(RunReport::executed(result, report, code))
    }

    /// Heap usage of the engine's live context.
    pub async fn memory_stats(&self) -> Option<MemoryStats> {
        self.engine.memory_stats().await
    }

    /// Releases the engine's context and detaches the tool source.
    pub async fn dispose(&self) {
        self.disconnect();
        self.engine.dispose().await;
    }

    fn connection(&self) -> Result<Arc<Connection>, CodeModeError> {
        self.connection.load_full().ok_or(CodeModeError::NotConnected)
    }
}

fn sandbox_config(config: &CodegateConfig) -> SandboxConfig {
    SandboxConfig {
        timeout: config.timeout(),
        memory_limit_mb: config.memory_limit_mb(),
        max_code_size: config.max_code_size(),
        max_tool_calls: config.max_tool_calls(),
        max_tool_call_args_size: config.max_tool_call_args_size(),
        namespace: config.namespace().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_settings_follow_config() {
        let config = CodegateConfig::from_toml(
            r#"
            [sandbox]
            timeout_ms = 1500
            memory_limit_mb = 48
            max_tool_calls = 3

            [validation]
            namespace = "api"
            "#,
        )
        .unwrap();
        let sandbox = sandbox_config(&config);
        assert_eq!(sandbox.timeout.as_millis(), 1500);
        assert_eq!(sandbox.memory_limit_mb, 48);
        assert_eq!(sandbox.max_tool_calls, 3);
        assert_eq!(sandbox.namespace, "api");
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = CodegateConfig::default();
        config.sandbox.timeout_ms = Some(0);
        assert!(matches!(CodeMode::new(config), Err(CodeModeError::Config(_))));
    }
}
