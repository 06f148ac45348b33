#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use copilot_runtime::config::RuntimeConfig;
use copilot_runtime::framing::FramingMode;
use copilot_runtime::gateway::AgentGateway;
use copilot_runtime::router::{build_router, AppState};
use copilot_runtime_protocol::{
    Envelope, MessageOutput, PatchData, PatchItem, PatchOperation,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

pub const NDJSON: &str = "application/x-ndjson";
pub const MULTIPART: &str = "multipart/mixed";
pub const EVENT_STREAM: &str = "text/event-stream";

pub struct TestApp {
    pub app: Router,
}

impl TestApp {
    pub fn new(gateway: Arc<dyn AgentGateway>) -> Self {
        Self::with_config(RuntimeConfig::default(), gateway)
    }

    pub fn with_config(config: RuntimeConfig, gateway: Arc<dyn AgentGateway>) -> Self {
        Self {
            app: build_router(AppState::new(config, gateway)),
        }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        self.send(Method::GET, uri, Body::empty(), None).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: &Value,
        accept: Option<&str>,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        self.send(Method::POST, uri, Body::from(body.to_string()), accept)
            .await
    }

    pub async fn post_raw(&self, uri: &str, body: &'static str) -> (StatusCode, HeaderMap, Vec<u8>) {
        self.send(Method::POST, uri, Body::from(body), None).await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Body,
        accept: Option<&str>,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        let request = builder.body(body).expect("build request");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request handled");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, headers, bytes.to_vec())
    }

    /// Runs a generate request and decodes the envelopes of the response.
    pub async fn run(&self, body: &Value, framing: FramingMode) -> Vec<Envelope> {
        let accept = match framing {
            FramingMode::Multipart => MULTIPART,
            FramingMode::Ndjson => NDJSON,
            FramingMode::EventStream => EVENT_STREAM,
        };
        let (status, headers, bytes) = self.post_json("/copilotkit", body, Some(accept)).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
        assert_eq!(
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some(framing.content_type())
        );
        decode(framing, &bytes)
            .into_iter()
            .map(|value| serde_json::from_value(value).expect("envelope"))
            .collect()
    }
}

pub fn generate_body(thread_id: &str, prompt: &str) -> Value {
    json!({
        "operationName": "generateCopilotResponse",
        "query": "mutation generateCopilotResponse($data: GenerateCopilotResponseInput!) { generateCopilotResponse(data: $data) { threadId } }",
        "variables": {
            "data": {
                "threadId": thread_id,
                "messages": [
                    {
                        "id": "user-1",
                        "textMessage": { "role": "user", "content": prompt }
                    }
                ],
                "frontend": { "actions": [] }
            }
        }
    })
}

pub fn decode(framing: FramingMode, bytes: &[u8]) -> Vec<Value> {
    let text = std::str::from_utf8(bytes).expect("utf8 body");
    match framing {
        FramingMode::Multipart => decode_multipart(text),
        FramingMode::Ndjson => decode_ndjson(text),
        FramingMode::EventStream => decode_event_stream(text),
    }
}

pub fn decode_multipart(text: &str) -> Vec<Value> {
    let body = text
        .strip_suffix("-----\n")
        .expect("closing boundary");
    body.split("---\n")
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (headers, json) = part.split_once("\n\n").expect("part headers");
            let json = json.strip_suffix('\n').expect("part newline");
            assert!(headers.contains("Content-Type: application/json; charset=utf-8"));
            assert!(headers.contains(&format!("Content-Length: {}", json.len())));
            serde_json::from_str(json).expect("part json")
        })
        .collect()
}

pub fn decode_ndjson(text: &str) -> Vec<Value> {
    assert!(text.ends_with('\n'));
    text.lines()
        .map(|line| serde_json::from_str(line).expect("ndjson line"))
        .collect()
}

pub fn decode_event_stream(text: &str) -> Vec<Value> {
    text.split("\n\n")
        .filter(|event| !event.is_empty())
        .map(|event| {
            let mut lines = event.lines();
            assert_eq!(lines.next(), Some("event: message"));
            let data = lines
                .next()
                .and_then(|line| line.strip_prefix("data: "))
                .expect("data line");
            serde_json::from_str(data).expect("event json")
        })
        .collect()
}

pub fn patches(envelopes: &[Envelope]) -> Vec<&PatchOperation> {
    envelopes.iter().flat_map(|envelope| &envelope.patches).collect()
}

/// Content items appended to `messages[index]`, in emission order.
pub fn content_items(envelopes: &[Envelope], index: usize) -> Vec<String> {
    patches(envelopes)
        .into_iter()
        .filter(|patch| {
            patch.path.message_index() == Some(index) && patch.path.content_offset().is_some()
        })
        .flat_map(|patch| patch.items().unwrap_or_default())
        .filter_map(|item| match item {
            PatchItem::Text(text) => Some(text.clone()),
            PatchItem::Message(_) => None,
        })
        .collect()
}

pub fn appended_messages(envelopes: &[Envelope]) -> Vec<MessageOutput> {
    patches(envelopes)
        .into_iter()
        .filter(|patch| patch.path.content_offset().is_none())
        .flat_map(|patch| patch.items().unwrap_or_default())
        .filter_map(|item| match item {
            PatchItem::Message(message) => Some(message.clone()),
            PatchItem::Text(_) => None,
        })
        .collect()
}

pub fn message_status_patches(envelopes: &[Envelope]) -> usize {
    patches(envelopes)
        .into_iter()
        .filter(|patch| matches!(patch.data(), Some(PatchData::TextMessageOutput { .. })))
        .count()
}

/// Replaces ids and timestamps so two runs can be compared.
pub fn normalize(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            for key in ["id", "createdAt", "runId", "threadId"] {
                if let Some(field) = map.get_mut(key) {
                    if field.is_string() {
                        *field = Value::String(format!("<{key}>"));
                    }
                }
            }
            for field in map.values_mut() {
                *field = normalize(field.take());
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                *item = normalize(item.take());
            }
        }
        _ => {}
    }
    value
}
