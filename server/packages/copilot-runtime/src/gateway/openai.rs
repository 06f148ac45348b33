use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{
    AgentEvent, AgentEventStream, AgentGateway, GatewayError, GatewayRequest, SYSTEM_PROMPT,
};
use crate::history::{InMemoryThreadStore, ThreadGuard};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl OpenAiConfig {
    /// Reads the API key from `OPENAI_API_KEY`. A missing key is reported
    /// per run rather than at startup.
    pub fn from_env(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::from_env(DEFAULT_OPENAI_BASE_URL, DEFAULT_MODEL)
    }
}

/// Streams chat completions from an OpenAI-compatible endpoint and keeps the
/// conversation per thread.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: Arc<OpenAiConfig>,
    history: Arc<InMemoryThreadStore>,
}

impl OpenAiGateway {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_history(config, Arc::new(InMemoryThreadStore::new()))
    }

    pub fn with_history(config: OpenAiConfig, history: Arc<InMemoryThreadStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
            history,
        }
    }

    pub fn history(&self) -> &Arc<InMemoryThreadStore> {
        &self.history
    }
}

impl AgentGateway for OpenAiGateway {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn invoke(&self, request: GatewayRequest) -> AgentEventStream {
        let state = RunState {
            client: self.client.clone(),
            config: self.config.clone(),
            history: self.history.clone(),
            phase: Phase::Start(request),
            pending: VecDeque::new(),
        };
        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                match std::mem::replace(&mut state.phase, Phase::Finished) {
                    Phase::Finished => return None,
                    Phase::Start(request) => {
                        state.phase = state.start(request).await;
                    }
                    Phase::Streaming(mut run) => {
                        let finished = match run.body.next().await {
                            Some(Ok(chunk)) => run.consume(&chunk, &mut state.pending),
                            Some(Err(err)) => {
                                tracing::warn!(error = %err, "model stream interrupted");
                                state.pending.push_back(GatewayError::Stream(err).into());
                                continue;
                            }
                            None => true,
                        };
                        if finished {
                            run.finish(&mut state.pending);
                        } else {
                            state.phase = Phase::Streaming(run);
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

struct RunState {
    client: reqwest::Client,
    config: Arc<OpenAiConfig>,
    history: Arc<InMemoryThreadStore>,
    phase: Phase,
    pending: VecDeque<AgentEvent>,
}

enum Phase {
    Start(GatewayRequest),
    Streaming(Box<ActiveRun>),
    Finished,
}

struct ActiveRun {
    guard: ThreadGuard,
    /// Id of the assistant message, shared with the client's text header so
    /// the reply merges with the copy the client sends back.
    message_id: String,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: Vec<u8>,
    text: TextAccumulator,
}

impl RunState {
    async fn start(&mut self, request: GatewayRequest) -> Phase {
        let mut guard = self.history.lock(&request.thread_id).await;
        guard.merge(&request.messages);
        self.pending.push_back(AgentEvent::StateSnapshot(json!({
            "threadId": request.thread_id.as_str(),
            "messageCount": guard.messages().len(),
        })));

        let Some(api_key) = self.config.api_key.as_deref() else {
            self.pending
                .push_back(GatewayError::MissingApiKey(API_KEY_ENV).into());
            return Phase::Finished;
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = completion_body(&self.config.model, &guard, &request);
        tracing::debug!(thread_id = %request.thread_id, run_id = %request.run_id, %url, "requesting chat completion");

        let response = match self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.pending.push_back(GatewayError::Request(err).into());
                return Phase::Finished;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            self.pending.push_back(
                GatewayError::Status {
                    status,
                    detail: detail.trim().to_string(),
                }
                .into(),
            );
            return Phase::Finished;
        }

        Phase::Streaming(Box::new(ActiveRun {
            guard,
            message_id: format!("run--{}", Uuid::new_v4()),
            body: response.bytes_stream().boxed(),
            lines: Vec::new(),
            text: TextAccumulator::default(),
        }))
    }
}

impl ActiveRun {
    /// Returns true once the terminating `[DONE]` line has been seen.
    fn consume(&mut self, chunk: &[u8], pending: &mut VecDeque<AgentEvent>) -> bool {
        self.lines.extend_from_slice(chunk);
        while let Some(end) = self.lines.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.lines.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            match parse_sse_line(&line) {
                SseLine::Done => return true,
                SseLine::Content(content) => {
                    if let Some(text) = self.text.push(&content) {
                        pending.push_back(self.delta(text));
                    }
                }
                SseLine::Ignore => {}
            }
        }
        false
    }

    fn delta(&self, text: String) -> AgentEvent {
        AgentEvent::TextDelta {
            text,
            message_id: Some(self.message_id.clone()),
        }
    }

    fn finish(mut self, pending: &mut VecDeque<AgentEvent>) {
        if let Some(text) = self.text.finish() {
            pending.push_back(self.delta(text));
        }
        let reply = self.text.full().trim();
        if !reply.is_empty() {
            self.guard.append_reply(&self.message_id, reply);
        }
        pending.push_back(AgentEvent::Done);
    }
}

fn completion_body(model: &str, guard: &ThreadGuard, request: &GatewayRequest) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
    messages.extend(guard.messages().iter().map(|message| {
        json!({
            "role": message.role.as_str(),
            "content": message.content,
        })
    }));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| tool.to_function_tool())
            .collect();
        body["tools"] = Value::Array(tools);
        body["parallel_tool_calls"] = Value::Bool(false);
    }
    body
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(chunk) => chunk["choices"][0]["delta"]["content"]
            .as_str()
            .filter(|content| !content.is_empty())
            .map(|content| SseLine::Content(content.to_string()))
            .unwrap_or(SseLine::Ignore),
        Err(err) => {
            tracing::warn!(error = %err, "skipping undecodable completion chunk");
            SseLine::Ignore
        }
    }
}

/// Collects streamed fragments and releases cumulative text only up to the
/// last whitespace, so a word is never reported half-written.
#[derive(Debug, Default)]
struct TextAccumulator {
    text: String,
    released: usize,
}

impl TextAccumulator {
    fn push(&mut self, fragment: &str) -> Option<String> {
        self.text.push_str(fragment);
        let boundary = self.text.trim_end().rfind(char::is_whitespace)?;
        let ready = self.text[..boundary].trim_end();
        if ready.len() <= self.released || ready.is_empty() {
            return None;
        }
        self.released = ready.len();
        Some(ready.to_string())
    }

    fn finish(&mut self) -> Option<String> {
        let ready = self.text.trim_end();
        if ready.len() <= self.released || ready.trim().is_empty() {
            return None;
        }
        self.released = ready.len();
        Some(ready.to_string())
    }

    fn full(&self) -> &str {
        &self.text
    }
}
