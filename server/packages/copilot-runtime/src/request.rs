//! Normalizes an inbound `generateCopilotResponse` request.
//!
//! The outer shape (`variables.data`, the `messages` and `actions` arrays) is
//! strict: a wrong type there is a malformed request. Individual message and
//! action entries are lenient: a malformed entry is skipped, a bad tool
//! schema falls back to an empty one.

use std::collections::HashSet;
use std::fmt;

use copilot_runtime_error::RuntimeError;
use copilot_runtime_protocol::OPERATION_NAME;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("invalid request variables: {0}")]
    InvalidVariables(#[source] serde_json::Error),
    #[error("no user message found in request")]
    NoUserMessage { thread_id: ThreadId },
}

impl From<RequestError> for RuntimeError {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::NoUserMessage { thread_id } => RuntimeError::NoUserMessage {
                thread_id: Some(thread_id.into_inner()),
            },
            other => RuntimeError::InvalidRequest {
                message: other.to_string(),
            },
        }
    }
}

/// Correlates a run with a persisted conversation. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uses the client-supplied id when it is non-empty.
    pub fn from_request(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => Self(value.to_string()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub parent_message_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            content: content.into(),
            parent_message_id: None,
        }
    }
}

/// A frontend action the agent may call. Passed through to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    /// OpenAI function-tool shape, as bound to the chat model.
    pub fn to_function_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct RequestModel {
    pub thread_id: ThreadId,
    pub run_id: Option<String>,
    pub agent_name: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    user_message_index: usize,
}

impl RequestModel {
    pub fn latest_user_message(&self) -> &Message {
        &self.messages[self.user_message_index]
    }
}

#[derive(Debug)]
pub enum InboundRequest {
    /// Anything other than the streaming mutation gets the static info object.
    Info,
    Generate(RequestModel),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCopilotResponseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub variables: GenerateVariables,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct GenerateVariables {
    #[serde(default)]
    pub data: GenerateData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Vec<MessageInput>)]
    #[schemars(with = "Vec<MessageInput>")]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub frontend: FrontendInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session: Option<AgentSessionInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct FrontendInput {
    #[serde(default)]
    #[schema(value_type = Vec<ActionInput>)]
    #[schemars(with = "Vec<ActionInput>")]
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text_message: TextMessageInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageInput {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the parameters, JSON-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    #[schemars(with = "Option<String>")]
    pub json_schema: Option<Value>,
}

/// Classifies a raw request body. An empty body is an info request.
pub fn parse(body: &[u8]) -> Result<InboundRequest, RequestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(InboundRequest::Info);
    }
    let value: Value = serde_json::from_slice(body).map_err(RequestError::InvalidJson)?;
    parse_value(value)
}

pub fn parse_value(value: Value) -> Result<InboundRequest, RequestError> {
    if !value.is_object() {
        return Err(RequestError::NotAnObject);
    }
    if !is_generate_operation(&value) {
        return Ok(InboundRequest::Info);
    }
    let request: GenerateCopilotResponseRequest =
        serde_json::from_value(value).map_err(RequestError::InvalidVariables)?;
    build_model(request.variables.data).map(InboundRequest::Generate)
}

fn is_generate_operation(value: &Value) -> bool {
    match value.get("operationName").and_then(Value::as_str) {
        Some(name) => name == OPERATION_NAME,
        None => value
            .get("query")
            .and_then(Value::as_str)
            .is_some_and(|query| query.contains(OPERATION_NAME)),
    }
}

fn build_model(data: GenerateData) -> Result<RequestModel, RequestError> {
    let thread_id = ThreadId::from_request(data.thread_id.as_deref());
    let messages: Vec<Message> = data
        .messages
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| parse_message(index, raw))
        .collect();
    let tools = parse_tools(data.frontend.actions);

    let user_message_index = messages
        .iter()
        .rposition(|message| message.role == Role::User)
        .ok_or_else(|| RequestError::NoUserMessage {
            thread_id: thread_id.clone(),
        })?;

    Ok(RequestModel {
        thread_id,
        run_id: data.run_id.filter(|run_id| !run_id.is_empty()),
        agent_name: data.agent_session.and_then(|session| session.agent_name),
        messages,
        tools,
        user_message_index,
    })
}

fn parse_message(index: usize, raw: Value) -> Option<Message> {
    match serde_json::from_value::<MessageInput>(raw) {
        Ok(input) => Some(Message {
            id: input
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("msg-{}", Uuid::new_v4())),
            role: input.text_message.role,
            content: input.text_message.content,
            parent_message_id: input.text_message.parent_message_id,
        }),
        Err(err) => {
            tracing::warn!(index, error = %err, "skipping malformed request message");
            None
        }
    }
}

fn parse_tools(actions: Vec<Value>) -> Vec<ToolDeclaration> {
    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    for (index, raw) in actions.into_iter().enumerate() {
        let action = match serde_json::from_value::<ActionInput>(raw) {
            Ok(action) if !action.name.is_empty() => action,
            Ok(_) => {
                tracing::warn!(index, "skipping action without a name");
                continue;
            }
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping malformed action");
                continue;
            }
        };
        if !seen.insert(action.name.clone()) {
            tracing::warn!(name = %action.name, "dropping duplicate action declaration");
            continue;
        }
        let parameters = parse_schema(&action.name, action.json_schema);
        tools.push(ToolDeclaration {
            name: action.name,
            description: action.description.unwrap_or_default(),
            parameters,
        });
    }
    tools
}

fn parse_schema(name: &str, raw: Option<Value>) -> Value {
    match raw {
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(schema @ Value::Object(_)) => schema,
            Ok(_) | Err(_) => {
                tracing::warn!(name, "action jsonSchema is not a JSON object, using empty schema");
                empty_schema()
            }
        },
        Some(schema @ Value::Object(_)) => schema,
        Some(Value::Null) | None => empty_schema(),
        Some(_) => {
            tracing::warn!(name, "action jsonSchema has unsupported type, using empty schema");
            empty_schema()
        }
    }
}

fn empty_schema() -> Value {
    Value::Object(Map::new())
}
