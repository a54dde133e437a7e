use super::{ExecutionRecord, PersistenceService, RequestRecord, UsageService};
use crate::channel::Channel;
use std::sync::{Arc, Mutex, MutexGuard};

/// State shared by the persistent inbound/outbound pair of one call.
///
/// The lock is never held across an `.await`.
pub type SharedState = Arc<Mutex<PersistenceState>>;

pub fn lock_state(state: &SharedState) -> MutexGuard<'_, PersistenceState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Request-scoped bookkeeping: created per inbound call, mutated across
/// channel attempts, dropped once the reply is delivered.
pub struct PersistenceState {
    pub persistence: Arc<dyn PersistenceService>,
    pub usage: Arc<dyn UsageService>,
    pub request: Option<RequestRecord>,
    /// Record of the attempt in flight on the current channel.
    pub execution: Option<ExecutionRecord>,
    pub channels: Vec<Arc<Channel>>,
    pub channel_index: usize,
}

impl PersistenceState {
    pub fn new(persistence: Arc<dyn PersistenceService>, usage: Arc<dyn UsageService>) -> Self {
        Self {
            persistence,
            usage,
            request: None,
            execution: None,
            channels: Vec::new(),
            channel_index: 0,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.id.as_str())
    }

    pub fn current_channel(&self) -> Option<Arc<Channel>> {
        self.channels.get(self.channel_index).cloned()
    }

    /// Move to the next candidate, forgetting the current attempt.
    pub fn advance(&mut self) -> Option<Arc<Channel>> {
        self.execution = None;
        if self.channel_index < self.channels.len() {
            self.channel_index += 1;
        }
        self.current_channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use crate::transformer::openai::OpenAiOutbound;

    #[test]
    fn advance_walks_candidates_once() {
        let store = Arc::new(InMemoryPersistence::new());
        let mut state = PersistenceState::new(store.clone(), store);
        state.channels = ["a", "b"]
            .iter()
            .map(|id| Arc::new(Channel::new(*id, Arc::new(OpenAiOutbound::new(None, "k")))))
            .collect();

        assert_eq!(state.current_channel().map(|c| c.id.clone()).as_deref(), Some("a"));
        assert_eq!(state.advance().map(|c| c.id.clone()).as_deref(), Some("b"));
        assert!(state.advance().is_none());
        assert!(state.advance().is_none());
        assert_eq!(state.channel_index, 2);
    }
}
