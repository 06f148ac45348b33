//! Drives one run: pulls agent events, sequences them into patches and
//! wraps them into envelopes. Any failure ends the stream with exactly one
//! terminal `Failed` envelope; nothing is pulled from the agent after that.

use std::collections::VecDeque;
use std::time::Duration;

use copilot_runtime_protocol::{Envelope, RunStatus};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::time::sleep;

use crate::envelope::EnvelopeBuilder;
use crate::gateway::{AgentEvent, AgentEventStream};
use crate::sequencer::PatchSequencer;

pub type EnvelopeStream = BoxStream<'static, Envelope>;

pub struct FailureTranslator {
    events: AgentEventStream,
    sequencer: PatchSequencer,
    builder: EnvelopeBuilder,
    token_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Streaming,
    Finished,
}

struct Translation {
    events: AgentEventStream,
    sequencer: PatchSequencer,
    builder: EnvelopeBuilder,
    token_delay: Duration,
    phase: Phase,
    pending: VecDeque<Envelope>,
}

impl FailureTranslator {
    pub fn new(events: AgentEventStream, sequencer: PatchSequencer, builder: EnvelopeBuilder) -> Self {
        Self {
            events,
            sequencer,
            builder,
            token_delay: Duration::ZERO,
        }
    }

    /// Pause before each content envelope, for a typing effect.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn into_stream(self) -> EnvelopeStream {
        let translation = Translation {
            events: self.events,
            sequencer: self.sequencer,
            builder: self.builder,
            token_delay: self.token_delay,
            phase: Phase::Start,
            pending: VecDeque::new(),
        };

        stream::unfold(translation, |mut translation| async move {
            loop {
                if let Some(envelope) = translation.pending.pop_front() {
                    if !translation.token_delay.is_zero() && carries_content(&envelope) {
                        sleep(translation.token_delay).await;
                    }
                    return Some((envelope, translation));
                }
                match translation.phase {
                    Phase::Finished => return None,
                    Phase::Start => {
                        let skeleton = translation.builder.skeleton();
                        translation.pending.push_back(skeleton);
                        translation.phase = Phase::Streaming;
                    }
                    Phase::Streaming => translation.pull().await,
                }
            }
        })
        .boxed()
    }
}

impl Translation {
    async fn pull(&mut self) {
        let event = match self.events.next().await {
            Some(event) => event,
            None => {
                tracing::debug!(
                    run_id = %self.sequencer.context().run_id,
                    "agent stream ended without a terminal event"
                );
                AgentEvent::Done
            }
        };

        match self.sequencer.on_event(event) {
            Ok(batches) => {
                for batch in batches {
                    self.pending.push_back(self.builder.patch(batch));
                }
                if self.sequencer.is_complete() {
                    tracing::info!(
                        thread_id = %self.sequencer.context().thread_id,
                        run_id = %self.sequencer.context().run_id,
                        messages = self.sequencer.message_index(),
                        "run completed"
                    );
                    self.finish(RunStatus::Success);
                }
            }
            Err(err) => {
                tracing::warn!(
                    thread_id = %self.sequencer.context().thread_id,
                    run_id = %self.sequencer.context().run_id,
                    error = %err,
                    "run failed"
                );
                self.finish(RunStatus::Failed(err.to_string()));
            }
        }
    }

    fn finish(&mut self, status: RunStatus) {
        self.pending.push_back(self.builder.terminal(status));
        self.phase = Phase::Finished;
        // Release the agent stream now rather than when the client goes away.
        self.events = stream::empty().boxed();
    }
}

impl Drop for Translation {
    fn drop(&mut self) {
        if self.phase != Phase::Finished {
            tracing::debug!(
                run_id = %self.sequencer.context().run_id,
                "response stream dropped before the run finished"
            );
        }
    }
}

fn carries_content(envelope: &Envelope) -> bool {
    envelope
        .patches
        .iter()
        .any(|patch| patch.path.content_offset().is_some())
}
