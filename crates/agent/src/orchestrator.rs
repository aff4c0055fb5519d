//! The orchestrator loop: one session, turn by turn.
//!
//! ```text
//! AwaitingInput → Generating ─┬─ no tools → Responding (or Correcting)
//!                             └─ tools → ExecutingBatch → Verifying → Success | Retry | Abort
//! ```
//!
//! Each turn attaches a keyboard listener for its whole duration; Esc or
//! Ctrl-C fires the turn's cancellation token, which the router and every
//! tool call observe.

use crate::classifier::{BehaviorClassifier, LazyBehavior, PatternClassifier};
use crate::console::Console;
use crate::prompt::SystemPromptBuilder;
use chrono::Utc;
use helmsman_config::AgentSettings;
use helmsman_core::{
    CancellationToken, ConversationHistory, Decider, Decision, DecisionRequest, DomainEvent,
    Error, EventBus, Message, ProviderError, Result, Tool, ToolError, ToolInvocation, ToolSet,
    ToolSource,
};
use helmsman_telemetry::TelemetryEngine;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Sent back to the model when it talked about work instead of doing it.
pub const CORRECTIVE_INSTRUCTION: &str = "SYSTEM: Your last reply did not call a tool. You have \
tools that can read, create and modify files and run commands. Do not refuse, do not claim work \
you have not done, and do not ask the user to do it. Reply with a tool call that performs the \
next step.";

/// Next input after a fully successful batch.
pub const CONTINUE_SENTINEL: &str = "SYSTEM: The previous steps succeeded. Continue with the next \
step of the task. If the task is complete, reply with tool \"none\" and a short summary.";

/// Reply of the memory query tool when nothing relevant is stored.
pub const NO_MEMORY: &str = "NO_MEMORY";

pub const SUPERVISOR_PROMPT: &str = r#"You are a strict reviewer. You are shown a user's request and the result of one tool call made to fulfil it.
Decide whether the result is a correct step towards the request.
Reply with a JSON object: {"tool": "none", "message": "PASS"} if it is, or {"tool": "none", "message": "FAIL: <reason>"} if it is not."#;

const MEMORY_HINT_LABEL: &str = "[Relevant past episode]";

/// Argument keys whose values name a file the agent produced.
const ARTIFACT_KEYS: &[&str] = &[
    "path",
    "file",
    "file_path",
    "filepath",
    "filename",
    "target",
    "destination",
];

const MAX_RESULT_CHARS: usize = 4000;

fn retry_instruction(tool: &str, reason: &str) -> String {
    format!(
        "SYSTEM: A reviewer rejected the result of `{tool}`: {reason}\nRework this step and try again."
    )
}

fn fix_it_instruction(tool: &str, error: &str) -> String {
    format!("SYSTEM: The tool `{tool}` failed: {error}\nFix the problem and try again.")
}

/// What a finished session did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub turns: u32,
    pub tool_calls: u32,
    pub artifacts: Vec<String>,
    pub cancelled_turns: u32,
    pub corrections: u32,
    pub supervisor_rejections: u32,
}

#[derive(Debug)]
enum Input {
    User(String),
    Synthetic(String),
}

#[derive(Default)]
struct Session {
    history: ConversationHistory,
    next: Option<Input>,
    tasks: VecDeque<String>,
    type_ahead: String,
    auto_steps: u32,
    artifacts: Vec<String>,
    original_request: String,
    summary: SessionSummary,
}

/// Drives one conversation against a [`Decider`] and a [`ToolSource`].
pub struct Orchestrator {
    decider: Arc<dyn Decider>,
    tools: Arc<dyn ToolSource>,
    console: Arc<dyn Console>,
    classifier: Box<dyn BehaviorClassifier>,
    prompt: SystemPromptBuilder,
    settings: AgentSettings,
    events: Option<Arc<EventBus>>,
    telemetry: Option<Arc<TelemetryEngine>>,
    interactive: bool,
    fast: bool,
}

impl Orchestrator {
    pub fn new(
        decider: Arc<dyn Decider>,
        tools: Arc<dyn ToolSource>,
        console: Arc<dyn Console>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            decider,
            tools,
            console,
            classifier: Box::new(PatternClassifier::new()),
            prompt: SystemPromptBuilder::new(settings.persona.clone()),
            settings: settings.clone(),
            events: None,
            telemetry: None,
            interactive: false,
            fast: false,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn BehaviorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_prompt(mut self, prompt: SystemPromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Read further input from the console once the initial input and tasks run out.
    pub fn interactive(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    /// Skip the response cache for every generation.
    pub fn fast(mut self, enabled: bool) -> Self {
        self.fast = enabled;
        self
    }

    /// Run the session until input runs out.
    ///
    /// In a non-interactive run a failed turn ends the session with its
    /// error; interactively it is logged and the loop waits for new input.
    pub async fn run(&self, initial: Option<String>, tasks: Vec<String>) -> Result<SessionSummary> {
        let mut session = Session {
            next: initial.map(Input::User),
            tasks: tasks.into(),
            ..Session::default()
        };
        let mut tools = self.tools.tools().await;
        info!(tools = tools.len(), interactive = self.interactive, "Session started");

        while let Some(input) = self.next_input(&mut session).await {
            match self.turn(&mut session, &mut tools, input).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => self.cancelled(&mut session),
                Err(e) => {
                    error!(error = %e, "Turn failed");
                    if !self.interactive {
                        return Err(e);
                    }
                    self.console.show(&format!("Error: {e}"));
                    session.next = None;
                }
            }
        }

        session.summary.artifacts = session.artifacts;
        info!(
            turns = session.summary.turns,
            tool_calls = session.summary.tool_calls,
            cancelled = session.summary.cancelled_turns,
            "Session finished"
        );
        Ok(session.summary)
    }

    async fn next_input(&self, session: &mut Session) -> Option<Input> {
        match session.next.take() {
            Some(Input::Synthetic(_)) if session.auto_steps >= self.settings.max_auto_steps => {
                warn!(
                    limit = self.settings.max_auto_steps,
                    "Auto-continuation limit reached, waiting for input"
                );
            }
            Some(Input::Synthetic(text)) => {
                session.auto_steps += 1;
                return Some(Input::Synthetic(text));
            }
            Some(user) => {
                session.auto_steps = 0;
                return Some(user);
            }
            None => {}
        }
        session.auto_steps = 0;

        if let Some(task) = session.tasks.pop_front() {
            return Some(Input::User(task));
        }
        if !self.interactive {
            return None;
        }

        loop {
            let prefill = std::mem::take(&mut session.type_ahead);
            let line = self.console.read_line(&prefill).await?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                return None;
            }
            return Some(Input::User(line.to_string()));
        }
    }

    async fn turn(&self, session: &mut Session, tools: &mut ToolSet, input: Input) -> Result<()> {
        let cancel = CancellationToken::new();
        let listener = self.console.listen(cancel.clone());

        let outcome = self.step(session, tools, input, &cancel).await;

        session.type_ahead = listener.typed_ahead();
        drop(listener);
        outcome
    }

    async fn step(
        &self,
        session: &mut Session,
        tools: &mut ToolSet,
        input: Input,
        cancel: &CancellationToken,
    ) -> Result<()> {
        session.summary.turns += 1;
        let synthetic = matches!(input, Input::Synthetic(_));
        let after_success = matches!(&input, Input::Synthetic(text) if text == CONTINUE_SENTINEL);
        let message = match input {
            Input::Synthetic(text) => Message::system(text),
            Input::User(text) => {
                session.original_request = text.clone();
                match self.recall(tools, &text, cancel).await {
                    Some(hint) => Message::user(format!("{MEMORY_HINT_LABEL}\n{hint}\n\n{text}")),
                    None => Message::user(text),
                }
            }
        };
        self.publish(DomainEvent::TurnStarted {
            input_preview: message.content.chars().take(80).collect(),
            synthetic,
            timestamp: Utc::now(),
        });
        session.history.push(message);
        let dropped = session.history.trim_to(self.settings.max_history);
        if dropped > 0 {
            debug!(
                dropped,
                estimated_tokens = session.history.estimated_tokens(),
                "Trimmed conversation history"
            );
        }

        let listing = self.listing(tools, cancel).await;
        let system_prompt = self
            .prompt
            .build(tools, listing.as_deref(), &session.artifacts);
        let mut request = DecisionRequest::new(system_prompt, session.history.messages().to_vec())
            .with_cancel(cancel.clone())
            .fast(self.fast);
        if let Some(sink) = self.console.token_sink() {
            request = request.with_token_sink(sink);
        }

        let decision = self.decider.decide(request).await?;
        let invocations = decision.invocations();
        self.publish(DomainEvent::DecisionReceived {
            tool_count: invocations.len(),
            tokens_used: decision.usage.map(|u| u.total_tokens).unwrap_or(0),
            timestamp: Utc::now(),
        });

        if !decision.requests_tools() {
            self.respond(session, &decision, after_success);
            return Ok(());
        }

        debug!(tools = invocations.len(), "Executing tool batch");
        session.history.push(Message::assistant(if decision.raw.is_empty() {
            serde_json::to_string(&invocations)?
        } else {
            decision.raw.clone()
        }));
        if !decision.message.trim().is_empty() {
            self.console.show(&decision.message);
        }

        if self.execute_batch(session, tools, &invocations, cancel).await? {
            self.store_episode(session, tools, &decision, cancel).await;
            session.next = Some(Input::Synthetic(CONTINUE_SENTINEL.to_string()));
        }
        Ok(())
    }

    /// Show a conversational reply, or correct it when it describes work
    /// instead of doing it. Right after a successful batch, claims of finished
    /// work describe tool calls that really happened and are shown as is.
    fn respond(&self, session: &mut Session, decision: &Decision, after_success: bool) {
        let text = if decision.message.trim().is_empty() {
            decision.raw.clone()
        } else {
            decision.message.clone()
        };

        let behavior = self
            .classifier
            .classify(&text)
            .filter(|b| !(after_success && *b == LazyBehavior::Hallucination));
        if let Some(behavior) = behavior {
            warn!(%behavior, "Agent described work instead of doing it, correcting");
            self.publish(DomainEvent::LazyBehaviorDetected {
                behavior: behavior.to_string(),
                timestamp: Utc::now(),
            });
            session.summary.corrections += 1;
            session.history.push(Message::assistant(text));
            session.next = Some(Input::Synthetic(CORRECTIVE_INSTRUCTION.to_string()));
            return;
        }

        self.console.show(&text);
        session.history.push(Message::assistant(text));
        session.next = None;
    }

    /// Run the batch in order. `Ok(false)` means a step failed and the next
    /// input has been set; a cancellation surfaces as an error.
    async fn execute_batch(
        &self,
        session: &mut Session,
        tools: &mut ToolSet,
        invocations: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for call in invocations {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled {
                    tool_name: call.tool.clone(),
                }
                .into());
            }

            let Some(tool) = tools.get(&call.tool) else {
                warn!(tool = %call.tool, "Model requested an unknown tool");
                session.history.push(Message::system(format!(
                    "Tool '{}' not found. Available tools: {}",
                    call.tool,
                    tools.names().join(", ")
                )));
                continue;
            };

            let args = if call.args.is_null() {
                serde_json::json!({})
            } else {
                call.args.clone()
            };
            let result = self.invoke(&tool, args.clone(), cancel).await;
            session.summary.tool_calls += 1;

            let output = match result {
                Ok(output) => output,
                Err(e @ ToolError::Cancelled { .. }) => return Err(e.into()),
                Err(_) if cancel.is_cancelled() => {
                    return Err(ToolError::Cancelled {
                        tool_name: call.tool.clone(),
                    }
                    .into());
                }
                Err(e) => {
                    warn!(tool = %call.tool, error = %e, "Tool execution failed");
                    session
                        .history
                        .push(Message::system(format!("Tool call {} failed: {e}", call.tool)));
                    session.next = Some(Input::Synthetic(fix_it_instruction(
                        &call.tool,
                        &e.to_string(),
                    )));
                    return Ok(false);
                }
            };

            collect_artifacts(&args, &mut session.artifacts);
            let rendered = output.to_string();
            session.history.push(Message::system(format!(
                "Tool call: {} {args}\nResult: {rendered}",
                call.tool
            )));

            if self.settings.refresh_tools.iter().any(|t| t == &call.tool) {
                *tools = self.tools.tools().await;
                info!(tools = tools.len(), trigger = %call.tool, "Refreshed tool list");
            }

            if let Some(reason) = self
                .supervise(&session.original_request, call, &args, &rendered, cancel)
                .await?
            {
                warn!(tool = %call.tool, %reason, "Supervisor rejected step");
                self.publish(DomainEvent::SupervisorRejected {
                    tool_name: call.tool.clone(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                session.summary.supervisor_rejections += 1;
                session.next = Some(Input::Synthetic(retry_instruction(&call.tool, &reason)));
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn invoke(
        &self,
        tool: &Arc<dyn Tool>,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let started = Instant::now();
        let result = tool.execute(args, cancel).await;
        let elapsed = started.elapsed();
        let success = result.is_ok();

        debug!(tool = %tool.name(), success, elapsed_ms = elapsed.as_millis() as u64, "Tool executed");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_tool(tool.name(), &tool.origin().to_string(), elapsed, success);
        }
        self.publish(DomainEvent::ToolExecuted {
            tool_name: tool.name().to_string(),
            success,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    /// Ask the decider whether a step's result serves the request.
    /// Returns the rejection text when the verdict mentions "fail".
    async fn supervise(
        &self,
        original_request: &str,
        call: &ToolInvocation,
        args: &serde_json::Value,
        result: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let result: String = result.chars().take(MAX_RESULT_CHARS).collect();
        let review = format!(
            "Request:\n{original_request}\n\nTool: {}\nArguments: {args}\nResult: {result}",
            call.tool
        );
        let request = DecisionRequest::new(SUPERVISOR_PROMPT, vec![Message::user(review)])
            .with_cancel(cancel.clone())
            .fast(self.fast);

        match self.decider.decide(request).await {
            Ok(verdict) => {
                let text = if verdict.message.trim().is_empty() {
                    verdict.raw
                } else {
                    verdict.message
                };
                Ok(text.to_lowercase().contains("fail").then_some(text))
            }
            Err(ProviderError::Cancelled) => Err(Error::Provider(ProviderError::Cancelled)),
            Err(e) => {
                warn!(error = %e, "Supervisor check unavailable, accepting step");
                Ok(None)
            }
        }
    }

    async fn recall(&self, tools: &ToolSet, query: &str, cancel: &CancellationToken) -> Option<String> {
        let tool = tools.get(&self.settings.memory_query_tool)?;
        match tool
            .execute(serde_json::json!({ "query": query }), cancel)
            .await
        {
            Ok(value) => {
                let text = value_text(&value);
                let text = text.trim();
                if text.is_empty() || text.eq_ignore_ascii_case(NO_MEMORY) {
                    return None;
                }
                debug!("Recalled a past episode");
                Some(text.to_string())
            }
            Err(e) => {
                debug!(error = %e, "Memory lookup failed");
                None
            }
        }
    }

    async fn listing(&self, tools: &ToolSet, cancel: &CancellationToken) -> Option<String> {
        let tool = tools.get(&self.settings.listing_tool)?;
        match tool.execute(serde_json::json!({ "path": "." }), cancel).await {
            Ok(value) => Some(value_text(&value)),
            Err(e) => {
                debug!(error = %e, "Repository listing failed");
                None
            }
        }
    }

    async fn store_episode(
        &self,
        session: &Session,
        tools: &ToolSet,
        decision: &Decision,
        cancel: &CancellationToken,
    ) {
        let Some(tool) = tools.get(&self.settings.memory_store_tool) else {
            return;
        };
        let task_id = uuid::Uuid::new_v4().to_string();
        let solution = if decision.message.trim().is_empty() {
            &decision.raw
        } else {
            &decision.message
        };
        let record = serde_json::json!({
            "task_id": task_id,
            "request": session.original_request,
            "solution": solution,
            "artifacts": session.artifacts,
        });

        match tool.execute(record, cancel).await {
            Ok(_) => {
                debug!(%task_id, "Stored episode");
                self.publish(DomainEvent::EpisodeStored {
                    task_id,
                    artifacts: session.artifacts.len(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => warn!(error = %e, "Failed to store episode"),
        }
    }

    fn cancelled(&self, session: &mut Session) {
        info!("Turn cancelled");
        self.console.show("(cancelled)");
        self.publish(DomainEvent::TurnCancelled {
            timestamp: Utc::now(),
        });
        session.summary.cancelled_turns += 1;
        session.next = None;
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn collect_artifacts(args: &serde_json::Value, artifacts: &mut Vec<String>) {
    for key in ARTIFACT_KEYS {
        if let Some(path) = args.get(key).and_then(|v| v.as_str()).map(str::trim)
            && !path.is_empty()
            && !artifacts.iter().any(|a| a == path)
        {
            artifacts.push(path.to_string());
        }
    }
}
