use std::time::Duration;

use crate::framing::FramingMode;
use crate::sequencer::SequencerOptions;

pub const DEFAULT_AGENT_NAME: &str = "agentic_chat";
pub const DEFAULT_AGENT_DESCRIPTION: &str = "A simple agentic chat flow using LangGraph";
pub const AGENT_TYPE: &str = "langgraph";
pub const SDK_VERSION: &str = "0.1.72";

/// Settings the router needs for every request.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub agent_name: String,
    pub agent_description: String,
    pub sdk_version: String,
    /// Used when the `Accept` header does not name a framing.
    pub framing: FramingMode,
    pub sequencer: SequencerOptions,
    pub token_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            agent_description: DEFAULT_AGENT_DESCRIPTION.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            framing: FramingMode::default(),
            sequencer: SequencerOptions::default(),
            token_delay: Duration::ZERO,
        }
    }
}
