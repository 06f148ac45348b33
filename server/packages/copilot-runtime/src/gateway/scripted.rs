use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{stream, StreamExt};

use super::{AgentEvent, AgentEventStream, AgentGateway, GatewayRequest};

/// Replays a fixed event list on every invocation.
///
/// Keeps counters so callers can observe how far the stream was pulled and
/// whether it was dropped.
#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    events: Vec<AgentEvent>,
    hang_after_script: bool,
    pulled: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
    last_request: Arc<Mutex<Option<GatewayRequest>>>,
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedGateway {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            hang_after_script: false,
            pulled: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Never finish after the script runs out, like an agent that stalls.
    pub fn then_hang(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    /// Number of events handed out so far.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Whether the last stream handed out has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GatewayRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

impl AgentGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn invoke(&self, request: GatewayRequest) -> AgentEventStream {
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }
        self.released.store(false, Ordering::SeqCst);

        let pulled = self.pulled.clone();
        let flag = ReleaseFlag(self.released.clone());
        let tail = if self.hang_after_script {
            stream::pending::<AgentEvent>().boxed()
        } else {
            stream::empty::<AgentEvent>().boxed()
        };
        stream::iter(self.events.clone())
            .chain(tail)
            .map(move |event| {
                let _held = &flag;
                pulled.fetch_add(1, Ordering::SeqCst);
                event
            })
            .boxed()
    }
}
