//! Wire types for GraphQL incremental ("defer/stream") delivery of a
//! `generateCopilotResponse` mutation.
//!
//! The client keeps a single response document and applies each
//! [`PatchOperation`] at its [`ResponsePath`]. Field names and `__typename`
//! discriminators are part of the frontend contract and must not change.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation name of the streaming mutation.
pub const OPERATION_NAME: &str = "generateCopilotResponse";
/// Root field every patch path starts from.
pub const RESPONSE_ROOT: &str = "generateCopilotResponse";

const MESSAGES_FIELD: &str = "messages";
const CONTENT_FIELD: &str = "content";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Field(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Address of a node in the response document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ResponsePath(Vec<PathSegment>);

impl ResponsePath {
    pub fn root() -> Self {
        Self(vec![RESPONSE_ROOT.into()])
    }

    /// `generateCopilotResponse.messages[index]`
    pub fn message(index: usize) -> Self {
        Self(vec![RESPONSE_ROOT.into(), MESSAGES_FIELD.into(), index.into()])
    }

    /// `generateCopilotResponse.messages[message].content[offset]`
    pub fn content(message: usize, offset: usize) -> Self {
        Self(vec![
            RESPONSE_ROOT.into(),
            MESSAGES_FIELD.into(),
            message.into(),
            CONTENT_FIELD.into(),
            offset.into(),
        ])
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Index into `messages` this path addresses, if any.
    pub fn message_index(&self) -> Option<usize> {
        match self.0.as_slice() {
            [PathSegment::Field(root), PathSegment::Field(field), PathSegment::Index(index), ..]
                if root == RESPONSE_ROOT && field == MESSAGES_FIELD =>
            {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Offset into a message's `content` array this path addresses, if any.
    pub fn content_offset(&self) -> Option<usize> {
        match self.0.as_slice() {
            [_, _, PathSegment::Index(_), PathSegment::Field(field), PathSegment::Index(offset)]
                if field == CONTENT_FIELD =>
            {
                Some(*offset)
            }
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.0.as_slice(), [PathSegment::Field(root)] if root == RESPONSE_ROOT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StatusCode {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "__typename")]
pub enum MessageStatus {
    SuccessMessageStatus { code: StatusCode },
}

impl MessageStatus {
    pub fn success() -> Self {
        Self::SuccessMessageStatus {
            code: StatusCode::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "__typename")]
pub enum ResponseStatus {
    SuccessResponseStatus { code: StatusCode },
    FailedResponseStatus { code: StatusCode, reason: String },
}

impl ResponseStatus {
    pub fn code(&self) -> StatusCode {
        match self {
            Self::SuccessResponseStatus { code } | Self::FailedResponseStatus { code, .. } => *code,
        }
    }
}

/// Outcome of one run, attached only to the terminal envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed(String),
}

impl From<RunStatus> for ResponseStatus {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::Success => Self::SuccessResponseStatus {
                code: StatusCode::Success,
            },
            RunStatus::Failed(reason) => Self::FailedResponseStatus {
                code: StatusCode::Failed,
                reason,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateMessageOutput {
    pub id: String,
    pub created_at: String,
    pub thread_id: String,
    /// JSON-encoded agent state.
    pub state: String,
    pub running: bool,
    pub agent_name: String,
    pub node_name: String,
    pub run_id: String,
    pub active: bool,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageOutput {
    pub id: String,
    pub created_at: String,
    pub role: String,
    pub parent_message_id: Option<String>,
    pub content: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "__typename")]
pub enum MessageOutput {
    AgentStateMessageOutput(AgentStateMessageOutput),
    TextMessageOutput(TextMessageOutput),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PatchItem {
    Message(MessageOutput),
    Text(String),
}

/// Object merged into the node at a patch path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "__typename")]
pub enum PatchData {
    TextMessageOutput { status: MessageStatus },
    CopilotResponse { status: ResponseStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum PatchPayload {
    /// Items appended to the array whose next free slot is the path.
    #[serde(rename = "items")]
    Items(Vec<PatchItem>),
    #[serde(rename = "data")]
    Data(PatchData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchOperation {
    #[serde(flatten)]
    pub payload: PatchPayload,
    pub path: ResponsePath,
}

impl PatchOperation {
    pub fn append(path: ResponsePath, items: Vec<PatchItem>) -> Self {
        Self {
            payload: PatchPayload::Items(items),
            path,
        }
    }

    pub fn merge(path: ResponsePath, data: PatchData) -> Self {
        Self {
            payload: PatchPayload::Data(data),
            path,
        }
    }

    pub fn items(&self) -> Option<&[PatchItem]> {
        match &self.payload {
            PatchPayload::Items(items) => Some(items),
            PatchPayload::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&PatchData> {
        match &self.payload {
            PatchPayload::Data(data) => Some(data),
            PatchPayload::Items(_) => None,
        }
    }
}

/// Initial shape of the response document, sent before any patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSkeleton {
    pub thread_id: String,
    pub run_id: Option<String>,
    pub extensions: Option<Value>,
    #[serde(rename = "__typename")]
    pub typename: String,
    pub messages: Vec<Value>,
    pub meta_events: Vec<Value>,
}

impl ResponseSkeleton {
    pub fn new(thread_id: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id,
            extensions: None,
            typename: "CopilotResponse".to_string(),
            messages: Vec::new(),
            meta_events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InitialData {
    #[serde(rename = "generateCopilotResponse")]
    pub response: ResponseSkeleton,
}

/// One transmitted unit of the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<InitialData>,
    #[serde(
        rename = "incremental",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub patches: Vec<PatchOperation>,
    #[serde(rename = "hasNext")]
    pub more: bool,
}

impl Envelope {
    pub fn is_terminal(&self) -> bool {
        !self.more
    }

    pub fn skeleton(&self) -> Option<&ResponseSkeleton> {
        self.data.as_ref().map(|data| &data.response)
    }

    /// Status carried by a terminal envelope.
    pub fn run_status(&self) -> Option<&ResponseStatus> {
        self.patches.iter().find_map(|patch| match patch.data() {
            Some(PatchData::CopilotResponse { status }) if patch.path.is_root() => Some(status),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skeleton_envelope_matches_wire_shape() {
        let envelope = Envelope {
            data: Some(InitialData {
                response: ResponseSkeleton::new("thread-1", None),
            }),
            patches: Vec::new(),
            more: true,
        };
        assert_eq!(
            serde_json::to_value(&envelope).expect("serialize"),
            json!({
                "data": {
                    "generateCopilotResponse": {
                        "threadId": "thread-1",
                        "runId": null,
                        "extensions": null,
                        "__typename": "CopilotResponse",
                        "messages": [],
                        "metaEvents": []
                    }
                },
                "hasNext": true
            })
        );
    }

    #[test]
    fn content_patch_uses_items_and_indexed_path() {
        let patch = PatchOperation::append(
            ResponsePath::content(1, 2),
            vec![PatchItem::Text(" world".to_string())],
        );
        assert_eq!(
            serde_json::to_value(&patch).expect("serialize"),
            json!({
                "items": [" world"],
                "path": ["generateCopilotResponse", "messages", 1, "content", 2]
            })
        );
    }

    #[test]
    fn failed_status_carries_reason_and_typename() {
        let patch = PatchOperation::merge(
            ResponsePath::root(),
            PatchData::CopilotResponse {
                status: RunStatus::Failed("boom".to_string()).into(),
            },
        );
        assert_eq!(
            serde_json::to_value(&patch).expect("serialize"),
            json!({
                "data": {
                    "__typename": "CopilotResponse",
                    "status": {
                        "__typename": "FailedResponseStatus",
                        "code": "Failed",
                        "reason": "boom"
                    }
                },
                "path": ["generateCopilotResponse"]
            })
        );
    }

    #[test]
    fn message_header_decodes_back_from_wire() {
        let raw = json!({
            "incremental": [{
                "items": [{
                    "__typename": "TextMessageOutput",
                    "id": "run--1",
                    "createdAt": "2025-11-19T15:00:00.000Z",
                    "role": "assistant",
                    "parentMessageId": null,
                    "content": []
                }],
                "path": ["generateCopilotResponse", "messages", 1]
            }],
            "hasNext": true
        });
        let envelope: Envelope = serde_json::from_value(raw).expect("decode");
        let patch = &envelope.patches[0];
        assert_eq!(patch.path.message_index(), Some(1));
        assert_eq!(patch.path.content_offset(), None);
        match patch.items() {
            Some([PatchItem::Message(MessageOutput::TextMessageOutput(header))]) => {
                assert_eq!(header.id, "run--1");
                assert!(header.content.is_empty());
            }
            other => panic!("unexpected items: {other:?}"),
        }
        assert!(!envelope.is_terminal());
    }

    #[test]
    fn path_helpers_classify_addresses() {
        assert!(ResponsePath::root().is_root());
        assert_eq!(ResponsePath::root().message_index(), None);
        assert_eq!(ResponsePath::content(3, 7).message_index(), Some(3));
        assert_eq!(ResponsePath::content(3, 7).content_offset(), Some(7));
    }
}
