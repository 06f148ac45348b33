//! Agent Execution Gateway: the seam between the streaming adapter and
//! whatever actually runs the chat model.

use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::request::{Message, RequestModel, ThreadId, ToolDeclaration};

mod mock;
mod openai;
mod scripted;

pub use mock::{MockGateway, MOCK_FAILURE_MARKER};
pub use openai::{OpenAiConfig, OpenAiGateway, DEFAULT_MODEL, DEFAULT_OPENAI_BASE_URL};
pub use scripted::ScriptedGateway;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Output of one agent run.
///
/// `TextDelta` carries the accumulated text of the current assistant
/// message. Consumers diff it against what they already sent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StateSnapshot(Value),
    TextDelta {
        text: String,
        message_id: Option<String>,
    },
    Done,
    Failure(String),
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta {
            text: text.into(),
            message_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failure(_))
    }
}

/// Failures raised inside a gateway. They never leave the gateway as
/// errors; they are reported as the run's `AgentEvent::Failure`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} is not configured")]
    MissingApiKey(&'static str),
    #[error("model request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("model endpoint returned {status}: {detail}")]
    Status {
        status: reqwest::StatusCode,
        detail: String,
    },
    #[error("model stream failed: {0}")]
    Stream(#[source] reqwest::Error),
}

impl From<GatewayError> for AgentEvent {
    fn from(value: GatewayError) -> Self {
        Self::Failure(value.to_string())
    }
}

pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub thread_id: ThreadId,
    pub run_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
}

impl GatewayRequest {
    pub fn from_model(model: &RequestModel, run_id: impl Into<String>) -> Self {
        Self {
            thread_id: model.thread_id.clone(),
            run_id: run_id.into(),
            messages: model.messages.clone(),
            tools: model.tools.clone(),
        }
    }
}

/// Produces the event sequence for one run.
///
/// Errors are reported as `AgentEvent::Failure`; timeouts are the
/// gateway's own business. Dropping the returned stream must release
/// everything tied to the run.
pub trait AgentGateway: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn invoke(&self, request: GatewayRequest) -> AgentEventStream;
}
