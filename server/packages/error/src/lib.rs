use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    NoUserMessage,
    Internal,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:copilot-runtime:error:invalid_request",
            Self::NoUserMessage => "urn:copilot-runtime:error:no_user_message",
            Self::Internal => "urn:copilot-runtime:error:internal",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::NoUserMessage => "No User Message",
            Self::Internal => "Internal Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::NoUserMessage => 400,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Errors that can surface before the response stream has started.
///
/// Once the first envelope is flushed the status line is committed, so
/// anything after that point is reported in-band instead.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("no user message found in request")]
    NoUserMessage { thread_id: Option<String> },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RuntimeError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::NoUserMessage { .. } => ErrorType::NoUserMessage,
            Self::Internal { .. } => ErrorType::Internal,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));
        let mut extensions = Map::new();
        match self {
            Self::NoUserMessage {
                thread_id: Some(thread_id),
            } => {
                extensions.insert("threadId".to_string(), Value::String(thread_id.clone()));
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<RuntimeError> for ProblemDetails {
    fn from(value: RuntimeError) -> Self {
        value.to_problem_details()
    }
}

impl From<&RuntimeError> for ProblemDetails {
    fn from(value: &RuntimeError) -> Self {
        value.to_problem_details()
    }
}
