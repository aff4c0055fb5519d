//! End-to-end session tests for the Helmsman agent runtime.
//!
//! These tests drive the real orchestrator, router (parser, cache, failover)
//! and tool registry together. Only the model provider, the console and the
//! tool server process are replaced with in-process doubles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helmsman_agent::{Console, KeyListener, Orchestrator, SUPERVISOR_PROMPT};
use helmsman_config::AgentSettings;
use helmsman_core::{
    CancellationToken, Completion, CompletionRequest, Provider, ProviderError, Tool, ToolError,
    ToolSet, Usage,
};
use helmsman_registry::{
    DiscoverySources, Launcher, ServerDescriptor, ServerOrigin, ToolProviderRegistry, Transport,
};
use helmsman_router::{FailoverChain, ModelRouter};
use helmsman_telemetry::TelemetryEngine;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays scripted model replies; supervisor reviews always pass.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    main_calls: Mutex<usize>,
    supervisor_calls: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            main_calls: Mutex::new(0),
            supervisor_calls: Mutex::new(0),
        })
    }

    fn main_calls(&self) -> usize {
        *self.main_calls.lock().unwrap()
    }

    fn supervisor_calls(&self) -> usize {
        *self.supervisor_calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let text = if request.system_prompt == SUPERVISOR_PROMPT {
            *self.supervisor_calls.lock().unwrap() += 1;
            r#"{"tool": "none", "message": "PASS"}"#.to_string()
        } else {
            *self.main_calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedProvider exhausted")
        };
        Ok(Completion {
            text,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
            provider: "e2e_mock".into(),
        })
    }
}

/// Always fails, to exercise failover.
struct DownProvider;

#[async_trait]
impl Provider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

// ── Console ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct CapturingConsole {
    shown: Mutex<Vec<String>>,
}

impl CapturingConsole {
    fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Console for CapturingConsole {
    async fn read_line(&self, _prefill: &str) -> Option<String> {
        None
    }

    fn show(&self, text: &str) {
        self.shown.lock().unwrap().push(text.to_string());
    }

    fn listen(&self, _cancel: CancellationToken) -> KeyListener {
        KeyListener::detached()
    }
}

// ── In-process weather tool server ───────────────────────────────────────

/// Launches a one-tool JSON-RPC server over an in-memory pipe and records
/// the arguments of every `tools/call`.
#[derive(Default)]
struct WeatherLauncher {
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Launcher for WeatherLauncher {
    async fn launch(
        &self,
        _descriptor: &ServerDescriptor,
    ) -> Result<Transport, helmsman_core::RegistryError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_weather(server, self.calls.clone()));
        let (reader, writer) = tokio::io::split(client);
        Ok(Transport::from_io(reader, writer))
    }
}

async fn serve_weather(stream: tokio::io::DuplexStream, calls: Arc<Mutex<Vec<Value>>>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(id) = msg.get("id").cloned() else {
            continue;
        };
        let result = match msg["method"].as_str().unwrap_or_default() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "weather", "version": "1.0.0"}
            }),
            "tools/list" => json!({
                "tools": [{
                    "name": "get_weather",
                    "description": "Current weather for a city",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"city": {"type": "string"}},
                        "required": ["city"]
                    }
                }]
            }),
            "tools/call" => {
                let args = msg["params"]["arguments"].clone();
                calls.lock().unwrap().push(args.clone());
                let body = json!({"city": args["city"], "sky": "clear", "celsius": 4});
                json!({"content": [{"type": "text", "text": body.to_string()}]})
            }
            _ => json!({}),
        };

        let mut out = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
        out.push('\n');
        if writer.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

// ── Local file tool ──────────────────────────────────────────────────────

struct WriteFileTool {
    root: std::path::PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file"
    }

    async fn execute(&self, args: Value, _cancel: &CancellationToken) -> Result<Value, ToolError> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing path".into()))?;
        let content = args["content"].as_str().unwrap_or_default();
        std::fs::write(self.root.join(path), content).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "write_file".into(),
            reason: e.to_string(),
        })?;
        Ok(json!({"written": content.len()}))
    }
}

fn router(provider: Arc<ScriptedProvider>) -> ModelRouter {
    ModelRouter::new(FailoverChain::new().add(provider, "mock-model", Duration::from_secs(30)))
        .with_cache(32)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_start_server_then_use_its_tool() {
    let launcher = Arc::new(WeatherLauncher::default());
    let calls = launcher.calls.clone();
    let registry = ToolProviderRegistry::builder(DiscoverySources::none())
        .launcher(launcher)
        .build();
    registry
        .register(ServerDescriptor::new(
            "weather",
            "weather-server",
            ServerOrigin::Configured,
        ))
        .await;

    let provider = ScriptedProvider::new(&[
        r#"I need weather tools first. {"thought": "start the server", "tool": "start_server", "args": {"name": "weather"}}"#,
        r#"{"tool": "get_weather", "args": {"city": "Oslo"}}"#,
        r#"{"tool": "none", "message": "It is 4 degrees and clear in Oslo."}"#,
    ]);
    let console = Arc::new(CapturingConsole::default());

    let summary = Orchestrator::new(
        Arc::new(router(provider.clone())),
        registry.clone(),
        console.clone(),
        &AgentSettings::default(),
    )
    .run(Some("What's the weather in Oslo?".into()), vec![])
    .await
    .unwrap();

    assert_eq!(summary.tool_calls, 2);
    assert_eq!(console.shown(), vec!["It is 4 degrees and clear in Oslo."]);
    assert!(registry.is_running("weather").await);
    assert_eq!(*calls.lock().unwrap(), vec![json!({"city": "Oslo"})]);
    assert_eq!(provider.main_calls(), 3);
    assert_eq!(provider.supervisor_calls(), 2);

    registry.shutdown().await;
    assert!(!registry.is_running("weather").await);
}

#[tokio::test]
async fn e2e_lazy_reply_is_corrected_into_a_tool_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut tools = ToolSet::new();
    tools.insert(Arc::new(WriteFileTool {
        root: dir.path().to_path_buf(),
    }));

    let provider = ScriptedProvider::new(&[
        "Sure! You can create a file named hello.txt containing the word hi.",
        r#"{"tool": "write_file", "args": {"path": "hello.txt", "content": "hi"}}"#,
        r#"{"tool": "none", "message": "hello.txt is ready."}"#,
    ]);
    let console = Arc::new(CapturingConsole::default());

    let summary = Orchestrator::new(
        Arc::new(router(provider.clone())),
        Arc::new(tools),
        console.clone(),
        &AgentSettings::default(),
    )
    .run(Some("make hello.txt say hi".into()), vec![])
    .await
    .unwrap();

    assert_eq!(summary.corrections, 1);
    assert_eq!(summary.artifacts, vec!["hello.txt"]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
        "hi"
    );
    assert_eq!(console.shown(), vec!["hello.txt is ready."]);
}

#[tokio::test]
async fn e2e_failover_reaches_second_provider() {
    let telemetry = Arc::new(TelemetryEngine::new());
    let provider = ScriptedProvider::new(&[r#"{"tool": "none", "message": "Hello from the backup."}"#]);
    let chain = FailoverChain::new()
        .add(Arc::new(DownProvider), "primary", Duration::from_secs(5))
        .add(provider.clone(), "backup", Duration::from_secs(5))
        .with_telemetry(telemetry.clone());
    let console = Arc::new(CapturingConsole::default());

    let summary = Orchestrator::new(
        Arc::new(ModelRouter::new(chain)),
        Arc::new(ToolSet::new()),
        console.clone(),
        &AgentSettings::default(),
    )
    .with_telemetry(telemetry.clone())
    .run(None, vec!["say hello".into()])
    .await
    .unwrap();

    assert_eq!(summary.turns, 1);
    assert_eq!(console.shown(), vec!["Hello from the backup."]);
    let usage = telemetry.snapshot();
    assert_eq!(usage.llm_calls, 2);
    assert_eq!(usage.failed_llm_calls, 1);
}
