//! Byte-level framing of the envelope stream.
//!
//! Each envelope is encoded and handed on as soon as it is produced; the
//! framer never holds more than one envelope.

use std::fmt;

use bytes::Bytes;
use copilot_runtime_protocol::Envelope;
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::EnvelopeStream;

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/mixed; boundary=\"-\"";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

const PART_BOUNDARY: &str = "---\n";
const CLOSING_BOUNDARY: &str = "-----\n";
const PART_CONTENT_TYPE: &str = "Content-Type: application/json; charset=utf-8";

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// `multipart/mixed` parts separated by `---` boundaries.
    #[default]
    Multipart,
    /// One JSON envelope per line.
    Ndjson,
    /// `event: message` server-sent events.
    #[value(name = "sse")]
    #[serde(rename = "sse")]
    EventStream,
}

impl FramingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multipart => "multipart",
            Self::Ndjson => "ndjson",
            Self::EventStream => "sse",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Multipart => MULTIPART_CONTENT_TYPE,
            Self::Ndjson => NDJSON_CONTENT_TYPE,
            Self::EventStream => EVENT_STREAM_CONTENT_TYPE,
        }
    }

    /// First media type in an `Accept` header that names a framing.
    pub fn from_accept(accept: &str) -> Option<Self> {
        accept.split(',').find_map(|entry| {
            let media_type = entry.split(';').next()?.trim().to_ascii_lowercase();
            match media_type.as_str() {
                "multipart/mixed" => Some(Self::Multipart),
                "application/x-ndjson" | "application/jsonl" => Some(Self::Ndjson),
                "text/event-stream" => Some(Self::EventStream),
                _ => None,
            }
        })
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, FramingError> {
        let json = serde_json::to_string(envelope)?;
        let framed = match self {
            Self::Multipart => format!(
                "{PART_BOUNDARY}{PART_CONTENT_TYPE}\nContent-Length: {}\n\n{json}\n",
                json.len()
            ),
            Self::Ndjson => format!("{json}\n"),
            Self::EventStream => format!("event: message\ndata: {json}\n\n"),
        };
        Ok(Bytes::from(framed))
    }

    /// Bytes written after the last envelope, if the framing has any.
    pub fn trailer(&self) -> Option<Bytes> {
        match self {
            Self::Multipart => Some(Bytes::from_static(CLOSING_BOUNDARY.as_bytes())),
            Self::Ndjson | Self::EventStream => None,
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn frame(
    mode: FramingMode,
    envelopes: EnvelopeStream,
) -> impl Stream<Item = Result<Bytes, FramingError>> + Send + 'static {
    envelopes
        .map(move |envelope| mode.encode(&envelope))
        .chain(stream::iter(mode.trailer().map(Ok)))
}
