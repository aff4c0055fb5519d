//! Request batching: coalesces concurrent calls that share a system prompt.
//!
//! Callers enqueue a job carrying a oneshot reply channel; a single consumer
//! task drains the queue whenever the debounce window elapses or the batch is
//! full. Jobs are grouped by system prompt. A group of one goes out as a
//! normal call; larger groups become one merged request whose answer is split
//! back per job id. Any job the merged answer does not cover is re-sent on its
//! own, so batching never changes what a caller receives.

use crate::failover::FailoverChain;
use crate::parser;
use helmsman_config::RouterConfig;
use helmsman_core::{CancellationToken, Completion, Message, ProviderError};
use helmsman_telemetry::TelemetryEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// When to flush the queue.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub window: Duration,
    pub max_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(50),
            max_size: 8,
        }
    }
}

impl From<&RouterConfig> for BatchSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            window: Duration::from_millis(config.batch_window_ms),
            max_size: config.max_batch_size.max(1),
        }
    }
}

/// One queued request.
struct Job {
    id: String,
    system_prompt: String,
    history: Vec<Message>,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<Completion, ProviderError>>,
}

/// Handle to the batching queue. Dropping it stops the consumer.
pub struct Batcher {
    tx: mpsc::UnboundedSender<Job>,
    next_id: AtomicU64,
    consumer: JoinHandle<()>,
}

impl Batcher {
    /// Start the consumer task. Must be called inside a Tokio runtime.
    pub fn spawn(
        chain: Arc<FailoverChain>,
        settings: BatchSettings,
        telemetry: Option<Arc<TelemetryEngine>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(run_queue(rx, chain, settings, telemetry));
        Self {
            tx,
            next_id: AtomicU64::new(1),
            consumer,
        }
    }

    /// Enqueue a request and wait for its completion.
    pub async fn submit(
        &self,
        system_prompt: String,
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError> {
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(Job {
                id,
                system_prompt,
                history,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| ProviderError::Unavailable("batching queue is closed".into()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            answer = rx => answer.unwrap_or_else(|_| {
                Err(ProviderError::Unavailable("batched request was dropped".into()))
            }),
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

async fn run_queue(
    mut rx: mpsc::UnboundedReceiver<Job>,
    chain: Arc<FailoverChain>,
    settings: BatchSettings,
    telemetry: Option<Arc<TelemetryEngine>>,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = vec![first];
        let deadline = Instant::now() + settings.window;

        while pending.len() < settings.max_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(job)) => pending.push(job),
                Ok(None) | Err(_) => break,
            }
        }

        debug!(jobs = pending.len(), "Flushing batch queue");
        for group in group_by_prompt(pending) {
            tokio::spawn(dispatch(group, chain.clone(), telemetry.clone()));
        }
    }
    debug!("Batch queue closed");
}

/// Groups in order of first arrival; jobs keep arrival order within a group.
fn group_by_prompt(jobs: Vec<Job>) -> Vec<Vec<Job>> {
    let mut groups: Vec<Vec<Job>> = Vec::new();
    for job in jobs {
        match groups
            .iter_mut()
            .find(|g| g[0].system_prompt == job.system_prompt)
        {
            Some(group) => group.push(job),
            None => groups.push(vec![job]),
        }
    }
    groups
}

async fn solo(job: Job, chain: &FailoverChain) {
    let result = chain
        .complete(&job.system_prompt, &job.history, &job.cancel, None)
        .await;
    // Receiver gone means the caller was cancelled
    let _ = job.reply.send(result);
}

async fn all_cancelled(jobs: &[Job]) {
    for job in jobs {
        job.cancel.cancelled().await;
    }
}

async fn dispatch(
    group: Vec<Job>,
    chain: Arc<FailoverChain>,
    telemetry: Option<Arc<TelemetryEngine>>,
) {
    let (cancelled, mut live): (Vec<Job>, Vec<Job>) =
        group.into_iter().partition(|j| j.cancel.is_cancelled());
    for job in cancelled {
        let _ = job.reply.send(Err(ProviderError::Cancelled));
    }

    if live.len() <= 1 {
        if let Some(job) = live.pop() {
            solo(job, &chain).await;
        }
        return;
    }

    info!(jobs = live.len(), "Dispatching merged request");
    if let Some(telemetry) = &telemetry {
        telemetry.record_batch(live.len());
    }

    let (system_prompt, request) = merged_request(&live);
    let history = [Message::user(request)];
    // The merged call serves several callers; it stops only when all have given up
    let merged_cancel = CancellationToken::new();
    let outcome = tokio::select! {
        _ = all_cancelled(&live) => None,
        outcome = chain.complete(&system_prompt, &history, &merged_cancel, None) => Some(outcome),
    };
    let Some(outcome) = outcome else {
        for job in live {
            let _ = job.reply.send(Err(ProviderError::Cancelled));
        }
        return;
    };

    let (mut answers, model, provider) = match outcome {
        Ok(completion) => (
            split_responses(&completion.text),
            completion.model,
            completion.provider,
        ),
        Err(e) => {
            warn!(error = %e, "Merged request failed, falling back to individual calls");
            (HashMap::new(), String::new(), String::new())
        }
    };

    let mut fallbacks = Vec::new();
    for job in live {
        match answers.remove(&job.id) {
            Some(text) => {
                let _ = job.reply.send(Ok(Completion {
                    text,
                    usage: None,
                    model: model.clone(),
                    provider: provider.clone(),
                }));
            }
            None => {
                debug!(id = %job.id, "No answer in merged response, sending alone");
                if let Some(telemetry) = &telemetry {
                    telemetry.record_batch_fallback();
                }
                fallbacks.push(solo(job, &chain));
            }
        }
    }
    futures::future::join_all(fallbacks).await;
}

/// Build the merged (system prompt, user message) pair for a group.
fn merged_request(jobs: &[Job]) -> (String, String) {
    let system_prompt = format!(
        "{}\n\n## Batched requests\n\
         You are answering {} independent requests at once. Answer each one exactly as you \
         would if it were the only request, following every instruction above.\n\
         Reply with a single JSON object and nothing else:\n\
         {{\"responses\": [{{\"id\": \"<request id>\", \"response\": <your complete answer>}}]}}\n\
         Include every request id exactly once.",
        jobs[0].system_prompt,
        jobs.len()
    );

    let mut request = String::new();
    for job in jobs {
        request.push_str(&format!("### Request {}\n", job.id));
        for message in &job.history {
            request.push_str(&format!("{}: {}\n", message.role, message.content));
        }
        request.push('\n');
    }

    (system_prompt, request.trim_end().to_string())
}

/// Map request id to answer text from a merged response.
fn split_responses(text: &str) -> HashMap<String, String> {
    let mut answers = HashMap::new();

    let mut take = |entry: &Value| {
        let id = match entry.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => format!("task-{n}"),
            _ => return,
        };
        let answer = match entry.get("response") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return,
            Some(other) => other.to_string(),
        };
        answers.entry(id).or_insert(answer);
    };

    for candidate in parser::extract_objects(text) {
        let Some(object) = parser::parse_object(candidate) else {
            continue;
        };
        match object.get("responses") {
            Some(Value::Array(entries)) => entries.iter().for_each(&mut take),
            _ => take(&Value::Object(object)),
        }
    }

    answers
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmsman_core::{CompletionRequest, Provider};
    use std::sync::Mutex;

    /// Answers merged requests per id (optionally dropping some ids) and
    /// plain requests with a fixed reply.
    struct MergingProvider {
        requests: Mutex<Vec<CompletionRequest>>,
        answer_ids: Option<Vec<String>>,
    }

    impl MergingProvider {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                answer_ids: None,
            }
        }

        fn answering_only(ids: &[&str]) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                answer_ids: Some(ids.iter().map(|s| s.to_string()).collect()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for MergingProvider {
        fn name(&self) -> &str {
            "merging"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            let body = &request.messages[0].content;

            let text = if body.starts_with("### Request") {
                let mut responses = Vec::new();
                let mut current = String::new();
                for line in body.lines() {
                    if let Some(id) = line.strip_prefix("### Request ") {
                        current = id.to_string();
                    } else if let Some(input) = line.strip_prefix("user: ") {
                        let wanted = self
                            .answer_ids
                            .as_ref()
                            .is_none_or(|ids| ids.contains(&current));
                        if wanted {
                            responses.push(serde_json::json!({
                                "id": current,
                                "response": {"tool": "none", "message": format!("answer: {input}")}
                            }));
                        }
                    }
                }
                format!("Here you go: {}", serde_json::json!({ "responses": responses }))
            } else {
                r#"{"tool":"none","message":"solo"}"#.to_string()
            };

            Ok(Completion {
                text,
                usage: None,
                model: request.model,
                provider: "merging".into(),
            })
        }
    }

    fn batcher(provider: Arc<MergingProvider>, telemetry: Arc<TelemetryEngine>) -> Batcher {
        let chain = FailoverChain::new().add(provider, "m1", Duration::from_secs(120));
        Batcher::spawn(
            Arc::new(chain),
            BatchSettings::default(),
            Some(telemetry),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn same_prompt_requests_share_one_call() {
        let provider = Arc::new(MergingProvider::new());
        let telemetry = Arc::new(TelemetryEngine::new());
        let batcher = batcher(provider.clone(), telemetry.clone());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            batcher.submit("sys".into(), vec![Message::user("alpha")], &cancel),
            batcher.submit("sys".into(), vec![Message::user("beta")], &cancel),
        );

        assert_eq!(provider.calls(), 1);
        let a = parser::parse(&a.unwrap().text);
        let b = parser::parse(&b.unwrap().text);
        assert_eq!(a.message, "answer: alpha");
        assert_eq!(b.message, "answer: beta");

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.batched_requests, 2);
        assert_eq!(snapshot.batch_fallbacks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ids_fall_back_to_solo_calls() {
        let provider = Arc::new(MergingProvider::answering_only(&["task-1"]));
        let telemetry = Arc::new(TelemetryEngine::new());
        let batcher = batcher(provider.clone(), telemetry.clone());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            batcher.submit("sys".into(), vec![Message::user("alpha")], &cancel),
            batcher.submit("sys".into(), vec![Message::user("beta")], &cancel),
        );

        assert_eq!(provider.calls(), 2);
        assert_eq!(parser::parse(&a.unwrap().text).message, "answer: alpha");
        assert_eq!(parser::parse(&b.unwrap().text).message, "solo");
        assert_eq!(telemetry.snapshot().batch_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_prompts_are_sent_separately() {
        let provider = Arc::new(MergingProvider::new());
        let telemetry = Arc::new(TelemetryEngine::new());
        let batcher = batcher(provider.clone(), telemetry.clone());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            batcher.submit("sys-a".into(), vec![Message::user("alpha")], &cancel),
            batcher.submit("sys-b".into(), vec![Message::user("beta")], &cancel),
        );

        assert_eq!(provider.calls(), 2);
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(telemetry.snapshot().batches_dispatched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_submit_returns_promptly() {
        let provider = Arc::new(MergingProvider::new());
        let batcher = batcher(provider.clone(), Arc::new(TelemetryEngine::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = batcher
            .submit("sys".into(), vec![Message::user("alpha")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[test]
    fn split_accepts_loose_responses() {
        let text = "{'responses': [{'id': 'task-1', 'response': 'plain text'}, {'id': 'task-2', 'response': {'tool': 'none'}},]}";
        let answers = split_responses(text);
        assert_eq!(answers["task-1"], "plain text");
        assert_eq!(answers["task-2"], r#"{"tool":"none"}"#);
    }

    #[test]
    fn settings_follow_config() {
        let config = RouterConfig {
            batch_window_ms: 20,
            max_batch_size: 0,
            ..RouterConfig::default()
        };
        let settings = BatchSettings::from(&config);
        assert_eq!(settings.window, Duration::from_millis(20));
        assert_eq!(settings.max_size, 1);
    }
}
