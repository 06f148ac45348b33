use copilot_runtime_protocol::{
    Envelope, InitialData, PatchData, PatchOperation, ResponsePath, ResponseSkeleton, RunStatus,
};

use crate::sequencer::PatchBatch;

/// Wraps the skeleton and patch batches of one response into envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    thread_id: String,
    run_id: Option<String>,
}

impl EnvelopeBuilder {
    pub fn new(thread_id: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id,
        }
    }

    /// `first` selects the skeleton envelope; its batch is ignored.
    pub fn wrap(&self, first: bool, patches: PatchBatch) -> Envelope {
        if first {
            self.skeleton()
        } else {
            self.patch(patches)
        }
    }

    /// First envelope: the empty response document, never any patches.
    pub fn skeleton(&self) -> Envelope {
        Envelope {
            data: Some(InitialData {
                response: ResponseSkeleton::new(self.thread_id.clone(), self.run_id.clone()),
            }),
            patches: Vec::new(),
            more: true,
        }
    }

    pub fn patch(&self, patches: PatchBatch) -> Envelope {
        Envelope {
            data: None,
            patches,
            more: true,
        }
    }

    /// Last envelope of the stream, carrying the run status at the root.
    pub fn terminal(&self, status: RunStatus) -> Envelope {
        Envelope {
            data: None,
            patches: vec![PatchOperation::merge(
                ResponsePath::root(),
                PatchData::CopilotResponse {
                    status: status.into(),
                },
            )],
            more: false,
        }
    }
}
