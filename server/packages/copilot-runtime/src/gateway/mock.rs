use std::time::Duration;

use futures::{stream, StreamExt};
use serde_json::json;
use tokio::time::sleep;

use super::{AgentEvent, AgentEventStream, AgentGateway, GatewayRequest};
use crate::request::Role;

const MOCK_WORD_STREAM_DELAY_MS: u64 = 30;
/// A user message containing this marker makes the mock fail mid-reply.
pub const MOCK_FAILURE_MARKER: &str = "[fail]";
const MOCK_FAILURE_REASON: &str = "mock agent failure requested";

/// Echoes the latest user message back word by word. No network access.
#[derive(Debug, Clone)]
pub struct MockGateway {
    word_delay: Duration,
}

impl MockGateway {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(MOCK_WORD_STREAM_DELAY_MS))
    }
}

impl AgentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn invoke(&self, request: GatewayRequest) -> AgentEventStream {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let fail = prompt.contains(MOCK_FAILURE_MARKER);
        let reply = format!("You said: {}", prompt.replace(MOCK_FAILURE_MARKER, ""));
        let words: Vec<&str> = reply.split_whitespace().collect();
        let cutoff = if fail {
            (words.len() / 2).max(1)
        } else {
            words.len()
        };

        let mut events = vec![AgentEvent::StateSnapshot(json!({
            "threadId": request.thread_id.as_str(),
            "messageCount": request.messages.len(),
        }))];
        let mut accumulated = String::new();
        for word in words.iter().take(cutoff) {
            if !accumulated.is_empty() {
                accumulated.push(' ');
            }
            accumulated.push_str(word);
            events.push(AgentEvent::text(accumulated.clone()));
        }
        events.push(if fail {
            AgentEvent::Failure(MOCK_FAILURE_REASON.to_string())
        } else {
            AgentEvent::Done
        });

        let delay = self.word_delay;
        stream::iter(events)
            .then(move |event| async move {
                if !delay.is_zero() && matches!(event, AgentEvent::TextDelta { .. }) {
                    sleep(delay).await;
                }
                event
            })
            .boxed()
    }
}
