//! CopilotKit-compatible streaming runtime core.

pub mod cli;
pub mod config;
pub mod envelope;
pub mod failure;
pub mod framing;
pub mod gateway;
pub mod history;
pub mod request;
pub mod router;
pub mod sequencer;
