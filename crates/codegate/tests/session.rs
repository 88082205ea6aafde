//! Session pipeline tests against an in-memory tool source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codegate::{
    BridgeError, CodeMode, CodeModeError, CodegateConfig, ErrorKind, RunOptions, Stage,
    ToolDescriptor, ToolSource,
};
use codegate_sandbox::{ExecutionEngine, ExecutionOptions, ExecutionResult, MemoryStats, ToolBridge};
use serde_json::{json, Value};
use serial_test::serial;

/// Serves a mutable tool list. Every call answers with its own name and
/// arguments, except `fail`, which always errors.
struct MemorySource {
    tools: Mutex<Vec<ToolDescriptor>>,
    listing_fails: bool,
}

impl MemorySource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tools: Mutex::new(catalog()),
            listing_fails: false,
        })
    }

    fn add(&self, tool: ToolDescriptor) {
        self.tools.lock().unwrap().push(tool);
    }
}

#[async_trait::async_trait]
impl ToolSource for MemorySource {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        if self.listing_fails {
            return Err(BridgeError::Disconnected("connection refused".into()));
        }
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, BridgeError> {
        if name == "fail" {
            return Err(BridgeError::Upstream {
                tool: name.into(),
                message: "quota exceeded".into(),
            });
        }
        Ok(json!({ "tool": name, "args": args }))
    }
}

fn catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "search-music!",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }),
        )
        .with_description("Search the catalog"),
        ToolDescriptor::new("fail", json!({ "type": "object" })),
    ]
}

/// Counts executions and succeeds without running anything.
#[derive(Default)]
struct CountingEngine {
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl ExecutionEngine for CountingEngine {
    async fn execute(
        &self,
        _code: &str,
        _bridge: Arc<dyn ToolBridge>,
        _options: ExecutionOptions,
    ) -> ExecutionResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ExecutionResult {
            success: true,
            output: Vec::new(),
            elapsed_ms: 0,
            error: None,
        }
    }

    async fn memory_stats(&self) -> Option<MemoryStats> {
        None
    }

    async fn dispose(&self) {}
}

fn config() -> CodegateConfig {
    CodegateConfig::from_toml(
        r#"
        [sandbox]
        timeout_ms = 5000
        memory_limit_mb = 64
        "#,
    )
    .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected() -> CodeMode {
    init_tracing();
    let session = CodeMode::new(config()).unwrap();
    session.connect(MemorySource::new()).await.unwrap();
    session
}

#[tokio::test]
async fn connect_generates_the_interface() {
    let session = CodeMode::new(config()).unwrap();
    assert!(!session.is_connected());

    let interface = session.connect(MemorySource::new()).await.unwrap();
    assert!(session.is_connected());
    assert!(interface.text.contains("declare const tools: {"));
    assert!(interface.text.contains("search_music_(input"));
    assert!(interface.text.contains("Search the catalog"));
    assert_eq!(interface.index.original_name("search_music_"), Some("search-music!"));
}

#[tokio::test]
async fn calls_before_connect_are_refused() {
    let session = CodeMode::new(config()).unwrap();
    assert!(matches!(session.interface(), Err(CodeModeError::NotConnected)));
    assert!(matches!(session.validate("1;"), Err(CodeModeError::NotConnected)));
    assert!(matches!(session.refresh().await, Err(CodeModeError::NotConnected)));
    assert!(matches!(
        session.execute("console.log(1);").await,
        Err(CodeModeError::NotConnected)
    ));
}

#[tokio::test]
async fn failed_listing_leaves_session_unconnected() {
    let session = CodeMode::new(config()).unwrap();
    let source = Arc::new(MemorySource {
        tools: Mutex::new(Vec::new()),
        listing_fails: true,
    });
    let err = session.connect(source).await.unwrap_err();
    assert!(matches!(err, CodeModeError::ToolListing(_)));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn undeclared_tool_never_reaches_the_engine() {
    let engine = Arc::new(CountingEngine::default());
    let session = CodeMode::with_engine(config(), engine.clone());
    session.connect(MemorySource::new()).await.unwrap();

    let report = session
        .execute("const a = 1;\nawait tools.delete_everything({});")
        .await
        .unwrap();
    assert!(!report.success);
    let error = report.error.as_ref().unwrap();
    assert_eq!(error.stage, Stage::Validation);
    assert!(error.kind.is_none());
    assert!(error.diagnostics[0].message.contains("'delete_everything'"));
    assert_eq!(error.diagnostics[0].line, Some(2));
    assert_eq!(engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn usage_check_applies_without_validation() {
    let mut config = config();
    config.validation.enabled = false;
    let engine = Arc::new(CountingEngine::default());
    let session = CodeMode::with_engine(config, engine.clone());
    session.connect(MemorySource::new()).await.unwrap();

    let report = session.execute("await tools.serch_music_({});").await.unwrap();
    let error = report.error.unwrap();
    assert_eq!(error.stage, Stage::Validation);
    assert!(error.diagnostics[0]
        .suggestions
        .iter()
        .any(|s| s == "Did you mean 'search_music_'?"));
    assert_eq!(engine.runs.load(Ordering::SeqCst), 0);

    let report = session.execute("await tools.fail({});").await.unwrap();
    assert!(report.success);
    assert_eq!(engine.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn validation_can_be_skipped_per_request() {
    let engine = Arc::new(CountingEngine::default());
    let session = CodeMode::with_engine(config(), engine.clone());
    session.connect(MemorySource::new()).await.unwrap();
    let code = "await tools.search_music_({ limit: 3 });";

    let report = session.execute(code).await.unwrap();
    assert_eq!(report.error.unwrap().stage, Stage::Validation);
    assert_eq!(engine.runs.load(Ordering::SeqCst), 0);

    let skip = RunOptions {
        validate: Some(false),
        ..RunOptions::default()
    };
    let report = session.execute_with(code, skip).await.unwrap();
    assert!(report.success);
    assert_eq!(engine.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn validation_can_be_forced_per_request() {
    let mut config = config();
    config.validation.enabled = false;
    let engine = Arc::new(CountingEngine::default());
    let session = CodeMode::with_engine(config, engine.clone());
    session.connect(MemorySource::new()).await.unwrap();
    let code = "console.log(missingName);";

    let report = session.execute(code).await.unwrap();
    assert!(report.success);
    assert_eq!(engine.runs.load(Ordering::SeqCst), 1);

    let force = RunOptions {
        validate: Some(true),
        ..RunOptions::default()
    };
    let report = session.execute_with(code, force).await.unwrap();
    let error = report.error.unwrap();
    assert_eq!(error.stage, Stage::Validation);
    assert_eq!(error.diagnostics[0].line, Some(1));
    assert_eq!(engine.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn type_errors_are_reported_with_location() {
    let session = CodeMode::with_engine(config(), Arc::new(CountingEngine::default()));
    session.connect(MemorySource::new()).await.unwrap();

    let validation = session
        .validate("const n = 1;\nawait tools.search_music_({ limit: 3 });")
        .unwrap();
    assert!(!validation.success);
    assert_eq!(validation.errors[0].line, Some(2));
}

#[tokio::test]
async fn refresh_swaps_the_interface() {
    let source = MemorySource::new();
    let session = CodeMode::with_engine(config(), Arc::new(CountingEngine::default()));
    session.connect(source.clone()).await.unwrap();
    let before = session.interface().unwrap();

    assert!(!session.refresh().await.unwrap());

    source.add(ToolDescriptor::new("get.weather", json!({ "type": "object" })));
    assert!(session.refresh().await.unwrap());

    let after = session.interface().unwrap();
    assert!(after.text.contains("get_weather("));
    assert!(!before.text.contains("get_weather("));

    let report = session.execute("await tools.get_weather();").await.unwrap();
    assert!(report.success, "{:?}", report.error);
}

#[tokio::test]
async fn disconnect_drops_the_source() {
    let session = CodeMode::with_engine(config(), Arc::new(CountingEngine::default()));
    session.connect(MemorySource::new()).await.unwrap();
    session.disconnect();
    assert!(matches!(
        session.execute("console.log(1);").await,
        Err(CodeModeError::NotConnected)
    ));
}

#[tokio::test]
#[serial]
async fn typed_code_runs_against_advertised_names() {
    let session = connected().await;
    let code = r#"const query: string = "blue";
const hit = await tools.search_music_({ query: query, limit: 2 });
console.log(JSON.stringify(hit));"#;

    let report = session.execute(code).await.unwrap();
    assert!(report.success, "{:?}", report.render_error());
    assert_eq!(
        report.output,
        vec![r#"{"args":{"limit":2,"query":"blue"},"tool":"search-music!"}"#]
    );
    session.dispose().await;
}

#[tokio::test]
#[serial]
async fn runtime_error_maps_to_the_submitted_line() {
    let session = connected().await;
    let code = "const hit = await tools.search_music_({ query: \"x\" });\nconsole.log(\"got it\");\nthrow new Error(\"boom\");";

    let report = session.execute(code).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.output, vec!["got it"]);

    let error = report.error.as_ref().unwrap();
    assert_eq!(error.stage, Stage::Execution);
    assert_eq!(error.kind, Some(ErrorKind::Runtime));
    let mapped = error.report.as_ref().unwrap();
    assert_eq!(mapped.location.map(|l| l.line), Some(3));
    assert_eq!(mapped.source_line.as_deref(), Some("throw new Error(\"boom\");"));
    assert_eq!(error.diagnostics[0].line, Some(3));
    assert!(report.render_error().unwrap().contains("boom"));
    session.dispose().await;
}

#[tokio::test]
#[serial]
async fn tool_failures_are_catchable() {
    let session = connected().await;
    let code = "try {\n  await tools.fail({});\n} catch (e) {\n  console.log(e.message);\n}";

    let report = session.execute(code).await.unwrap();
    assert!(report.success, "{:?}", report.render_error());
    assert_eq!(report.output, vec!["tool call 'fail' failed: quota exceeded"]);
    session.dispose().await;
}

#[tokio::test]
#[serial]
async fn timeout_is_recoverable_and_session_survives() {
    let session = connected().await;
    let options = RunOptions {
        timeout: Some(Duration::from_millis(300)),
        ..RunOptions::default()
    };

    let started = Instant::now();
    let report = session.execute_with("while (true) {}", options).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    let error = report.error.unwrap();
    assert_eq!(error.kind, Some(ErrorKind::Timeout));
    assert!(error.recoverable);

    let report = session.execute("console.log(\"still here\");").await.unwrap();
    assert_eq!(report.output, vec!["still here"]);
    session.dispose().await;
}

#[tokio::test]
#[serial]
async fn dispose_releases_everything() {
    let session = connected().await;
    session.execute("console.log(1);").await.unwrap();
    let stats = session.memory_stats().await.unwrap();
    assert_eq!(stats.limit_bytes, 64 * 1024 * 1024);

    session.dispose().await;
    assert!(!session.is_connected());
    assert!(session.memory_stats().await.is_none());
}
