//! Turns agent events into addressed patches against the response document.
//!
//! The sequencer only tracks the document's shape: the current message
//! index, the open message's content length, and the text already sent for
//! it. Layout of `messages` for one run:
//!
//! ```text
//! [0]      AgentStateMessageOutput (active)
//! [1..n]   TextMessageOutput, one per assistant message
//! [n+1]    AgentStateMessageOutput (inactive, full transcript)
//! ```

use chrono::{SecondsFormat, Utc};
use copilot_runtime_protocol::{
    AgentStateMessageOutput, MessageOutput, MessageStatus, PatchData, PatchItem, PatchOperation,
    ResponsePath, TextMessageOutput,
};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::AgentEvent;
use crate::request::RequestModel;

pub const NODE_NAME: &str = "chat_node";
const ASSISTANT_ROLE: &str = "assistant";

/// Patches that must reach the client together, in order.
pub type PatchBatch = Vec<PatchOperation>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("{0}")]
    Agent(String),
    #[error("agent event received after the run completed")]
    EventAfterCompletion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Emit all tokens of one delta as a single batch instead of one batch
    /// per token.
    pub batch_tokens: bool,
}

/// Per-run values stamped into the state and text records.
#[derive(Debug, Clone)]
pub struct SequencerContext {
    pub thread_id: String,
    pub run_id: String,
    pub agent_name: String,
    /// Declared tools in function-tool form.
    pub tools: Vec<Value>,
    pub user_message_id: Option<String>,
    pub user_message: String,
}

impl SequencerContext {
    pub fn from_model(
        model: &RequestModel,
        run_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        let user = model.latest_user_message();
        Self {
            thread_id: model.thread_id.to_string(),
            run_id: run_id.into(),
            agent_name: agent_name.into(),
            tools: model
                .tools
                .iter()
                .map(|tool| tool.to_function_tool())
                .collect(),
            user_message_id: Some(user.id.clone()),
            user_message: user.content.clone(),
        }
    }
}

#[derive(Debug)]
struct OpenMessage {
    message_id: Option<String>,
    content_len: usize,
    /// Upstream text already turned into content items.
    sent: String,
    /// Text as the client reconstructs it from the content items.
    rendered: String,
}

#[derive(Debug)]
pub struct PatchSequencer {
    context: SequencerContext,
    options: SequencerOptions,
    message_index: usize,
    state_started: bool,
    current: Option<OpenMessage>,
    transcript: Vec<String>,
    complete: bool,
}

impl PatchSequencer {
    pub fn new(context: SequencerContext, options: SequencerOptions) -> Self {
        Self {
            context,
            options,
            message_index: 0,
            state_started: false,
            current: None,
            transcript: Vec::new(),
            complete: false,
        }
    }

    pub fn context(&self) -> &SequencerContext {
        &self.context
    }

    /// Index the next message record will be appended at.
    pub fn message_index(&self) -> usize {
        self.message_index
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn on_event(&mut self, event: AgentEvent) -> Result<Vec<PatchBatch>, SequencerError> {
        if self.complete {
            return Err(SequencerError::EventAfterCompletion);
        }

        let mut batches = Vec::new();
        match event {
            AgentEvent::StateSnapshot(_) => {
                if self.state_started {
                    tracing::debug!(run_id = %self.context.run_id, "ignoring repeated state snapshot");
                } else {
                    batches.push(self.start_state());
                }
            }
            AgentEvent::TextDelta { text, message_id } => {
                if !self.state_started {
                    batches.push(self.start_state());
                }
                self.on_text(text, message_id, &mut batches);
            }
            AgentEvent::Done => {
                if !self.state_started {
                    batches.push(self.start_state());
                }
                if let Some(batch) = self.close_message() {
                    batches.push(batch);
                }
                batches.push(self.final_state());
                self.complete = true;
            }
            AgentEvent::Failure(reason) => {
                self.complete = true;
                return Err(SequencerError::Agent(reason));
            }
        }
        Ok(batches)
    }

    fn on_text(&mut self, text: String, message_id: Option<String>, batches: &mut Vec<PatchBatch>) {
        let switched = match (&self.current, &message_id) {
            (Some(open), Some(id)) => open.message_id.as_deref() != Some(id.as_str()),
            _ => false,
        };
        if switched {
            if let Some(batch) = self.close_message() {
                batches.push(batch);
            }
        }

        let sent = self
            .current
            .as_ref()
            .map(|open| open.sent.as_str())
            .unwrap_or_default();
        if text.is_empty() || sent.starts_with(text.as_str()) {
            tracing::debug!(
                run_id = %self.context.run_id,
                message_index = self.message_index,
                "skipping delta with no new content"
            );
            return;
        }
        // Deltas that extend the sent text are cumulative; anything else is
        // an incremental fragment appended to it.
        let (suffix, next_sent) = match text.strip_prefix(sent) {
            Some(suffix) => (suffix.to_string(), text.clone()),
            None => (text.clone(), format!("{sent}{text}")),
        };
        let tokens: Vec<String> = suffix.split_whitespace().map(str::to_string).collect();

        if tokens.is_empty() {
            if let Some(open) = self.current.as_mut() {
                open.sent = next_sent;
            }
            return;
        }

        if self.current.is_none() {
            batches.push(self.start_message(message_id));
        }
        let index = self.message_index;
        let Some(open) = self.current.as_mut() else {
            return;
        };

        let mut patches = Vec::with_capacity(tokens.len());
        for token in tokens {
            let item = if open.content_len == 0 {
                token
            } else {
                format!(" {token}")
            };
            open.rendered.push_str(&item);
            patches.push(PatchOperation::append(
                ResponsePath::content(index, open.content_len),
                vec![PatchItem::Text(item)],
            ));
            open.content_len += 1;
        }
        open.sent = next_sent;

        if self.options.batch_tokens {
            batches.push(patches);
        } else {
            batches.extend(patches.into_iter().map(|patch| vec![patch]));
        }
    }

    fn start_state(&mut self) -> PatchBatch {
        self.state_started = true;
        let state = json!({ "tools": self.context.tools });
        let patch = PatchOperation::append(
            ResponsePath::message(self.message_index),
            vec![self.state_record(true, state)],
        );
        self.message_index += 1;
        vec![patch]
    }

    fn start_message(&mut self, message_id: Option<String>) -> PatchBatch {
        let header = TextMessageOutput {
            id: message_id
                .clone()
                .unwrap_or_else(|| format!("run--{}", Uuid::new_v4())),
            created_at: timestamp(),
            role: ASSISTANT_ROLE.to_string(),
            parent_message_id: self.context.user_message_id.clone(),
            content: Vec::new(),
        };
        self.current = Some(OpenMessage {
            message_id,
            content_len: 0,
            sent: String::new(),
            rendered: String::new(),
        });
        vec![PatchOperation::append(
            ResponsePath::message(self.message_index),
            vec![PatchItem::Message(MessageOutput::TextMessageOutput(header))],
        )]
    }

    fn close_message(&mut self) -> Option<PatchBatch> {
        let open = self.current.take()?;
        self.transcript.push(open.rendered);
        let patch = PatchOperation::merge(
            ResponsePath::message(self.message_index),
            PatchData::TextMessageOutput {
                status: MessageStatus::success(),
            },
        );
        self.message_index += 1;
        Some(vec![patch])
    }

    fn final_state(&mut self) -> PatchBatch {
        let state = json!({
            "tools": self.context.tools,
            "messages": [
                { "role": "user", "content": self.context.user_message },
                { "role": ASSISTANT_ROLE, "content": self.transcript.join("\n") },
            ],
        });
        let patch = PatchOperation::append(
            ResponsePath::message(self.message_index),
            vec![self.state_record(false, state)],
        );
        self.message_index += 1;
        vec![patch]
    }

    fn state_record(&self, active: bool, state: Value) -> PatchItem {
        PatchItem::Message(MessageOutput::AgentStateMessageOutput(
            AgentStateMessageOutput {
                id: format!("ck-{}", Uuid::new_v4()),
                created_at: timestamp(),
                thread_id: self.context.thread_id.clone(),
                state: state.to_string(),
                running: true,
                agent_name: self.context.agent_name.clone(),
                node_name: NODE_NAME.to_string(),
                run_id: self.context.run_id.clone(),
                active,
                role: ASSISTANT_ROLE.to_string(),
            },
        ))
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
