//! Bounded conversation memory.
//!
//! Append-only logs for provider messages and chat turns, plus one active
//! session, each independently capped. Persistence goes through a
//! [`KeyValueStore`] one component at a time, so a corrupt or oversized
//! component degrades to an empty log instead of failing the whole load.

use crate::error::AgentError;
use crate::store::KeyValueStore;
use crate::types::{ConversationTurn, Message, Session, SessionStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Message log cap and the size it shrinks to when exceeded.
const MESSAGE_CAP: usize = 500;
const MESSAGE_KEEP: usize = 250;

/// Chat-history cap and its truncation target.
const HISTORY_CAP: usize = 100;
const HISTORY_KEEP: usize = 50;

/// Aggregate storage quota. No single component may serialize to more than
/// a quarter of it.
const STORAGE_QUOTA_BYTES: usize = 10 * 1024 * 1024;
const COMPONENT_QUOTA_BYTES: usize = STORAGE_QUOTA_BYTES / 4;

const KEY_MESSAGES: &str = "memory_messages";
const KEY_HISTORY: &str = "memory_chat_history";
const KEY_SESSION: &str = "memory_session";

#[derive(Default)]
struct MemoryState {
    messages: VecDeque<Message>,
    history: VecDeque<ConversationTurn>,
    session: Option<Session>,
}

/// Bounded, persisted conversation memory. One instance per agent.
pub struct MemorySystem {
    store: Arc<dyn KeyValueStore>,
    state: RwLock<MemoryState>,
}

impl MemorySystem {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Appends a provider message, truncating to the most recent
    /// [`MESSAGE_KEEP`] entries once the cap is exceeded.
    pub fn append_message(&self, message: Message) {
        let mut state = self.state.write().expect("memory lock poisoned");
        state.messages.push_back(message);
        if state.messages.len() > MESSAGE_CAP {
            let drop = state.messages.len() - MESSAGE_KEEP;
            state.messages.drain(..drop);
            debug!(kept = MESSAGE_KEEP, "Truncated message log");
        }
    }

    /// Appends a finished conversation turn. Turns are never mutated after
    /// this point.
    pub fn append_turn(&self, turn: ConversationTurn) {
        let mut state = self.state.write().expect("memory lock poisoned");
        state.history.push_back(turn);
        if state.history.len() > HISTORY_CAP {
            let drop = state.history.len() - HISTORY_KEEP;
            state.history.drain(..drop);
            debug!(kept = HISTORY_KEEP, "Truncated chat history");
        }
    }

    pub fn message_count(&self) -> usize {
        self.state.read().expect("memory lock poisoned").messages.len()
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.state
            .read()
            .expect("memory lock poisoned")
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// The most recent `n` turns, oldest first. Used to build the context
    /// string handed to tools.
    pub fn recent_turns(&self, n: usize) -> Vec<ConversationTurn> {
        let state = self.state.read().expect("memory lock poisoned");
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn start_session(&self, kind: impl Into<String>) -> Session {
        let session = Session::start(kind);
        info!(session_id = %session.id, "Session started");
        self.state
            .write()
            .expect("memory lock poisoned")
            .session
            .replace(session.clone());
        session
    }

    /// Closes the active session, stamping its end time. No-op when no
    /// session is active or the session already ended.
    pub fn end_session(&self) -> Option<Session> {
        let mut state = self.state.write().expect("memory lock poisoned");
        let session = state.session.as_mut()?;
        if session.status == SessionStatus::Ended {
            return Some(session.clone());
        }
        session.end();
        info!(session_id = %session.id, "Session ended");
        Some(session.clone())
    }

    pub fn active_session(&self) -> Option<Session> {
        self.state
            .read()
            .expect("memory lock poisoned")
            .session
            .clone()
            .filter(|s| s.status == SessionStatus::Active)
    }

    /// Drops all in-memory state and the persisted copies.
    pub async fn clear(&self) -> Result<(), AgentError> {
        {
            let mut state = self.state.write().expect("memory lock poisoned");
            *state = MemoryState::default();
        }
        for key in [KEY_MESSAGES, KEY_HISTORY, KEY_SESSION] {
            self.store.remove(key).await?;
        }
        info!("Memory cleared");
        Ok(())
    }

    /// Persists each component independently. A component that exceeds its
    /// quota share is truncated from the oldest end before serialization.
    pub async fn save_to_storage(&self) -> Result<(), AgentError> {
        let (messages, history, session) = {
            let mut state = self.state.write().expect("memory lock poisoned");
            enforce_quota(&mut state.messages, COMPONENT_QUOTA_BYTES);
            enforce_quota(&mut state.history, COMPONENT_QUOTA_BYTES);
            (
                serde_json::to_value(&state.messages)
                    .map_err(|e| AgentError::Storage(e.to_string()))?,
                serde_json::to_value(&state.history)
                    .map_err(|e| AgentError::Storage(e.to_string()))?,
                serde_json::to_value(&state.session)
                    .map_err(|e| AgentError::Storage(e.to_string()))?,
            )
        };
        self.store.put(KEY_MESSAGES, messages).await?;
        self.store.put(KEY_HISTORY, history).await?;
        self.store.put(KEY_SESSION, session).await?;
        debug!("Memory persisted");
        Ok(())
    }

    /// Restores whatever components load cleanly; a corrupt component is
    /// logged and left empty rather than failing the others.
    pub async fn load_from_storage(&self) -> Result<(), AgentError> {
        let messages: VecDeque<Message> = self.load_component(KEY_MESSAGES).await;
        let history: VecDeque<ConversationTurn> = self.load_component(KEY_HISTORY).await;
        let session: Option<Session> = self.load_component(KEY_SESSION).await;

        let mut state = self.state.write().expect("memory lock poisoned");
        state.messages = messages;
        state.history = history;
        state.session = session;
        info!(
            messages = state.messages.len(),
            turns = state.history.len(),
            "Memory restored from storage"
        );
        Ok(())
    }

    async fn load_component<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(component) => component,
                Err(e) => {
                    warn!(key, error = %e, "Discarding corrupt memory component");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key, error = %e, "Failed to load memory component; starting empty");
                T::default()
            }
        }
    }
}

/// Drops oldest entries until the serialized component fits its quota
/// share. Idempotent: a component already within quota is untouched.
fn enforce_quota<T: Serialize>(log: &mut VecDeque<T>, quota: usize) {
    loop {
        let size = serde_json::to_vec(&log).map(|b| b.len()).unwrap_or(0);
        if size <= quota || log.is_empty() {
            return;
        }
        // Halve from the oldest end rather than popping one at a time.
        let drop = (log.len() / 2).max(1);
        log.drain(..drop);
        warn!(dropped = drop, "Component exceeded storage quota; truncated oldest entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::TurnRole;
    use serde_json::json;

    fn memory() -> MemorySystem {
        MemorySystem::new(Arc::new(InMemoryStore::new()))
    }

    fn turn(content: &str) -> ConversationTurn {
        ConversationTurn::new(TurnRole::User, content, vec![])
    }

    #[test]
    fn test_message_log_truncates_to_most_recent() {
        let memory = memory();
        for i in 0..=MESSAGE_CAP {
            memory.append_message(Message::user(format!("m{i}")));
        }
        assert_eq!(memory.message_count(), MESSAGE_KEEP);
    }

    #[test]
    fn test_history_truncates_and_keeps_newest() {
        let memory = memory();
        for i in 0..=HISTORY_CAP {
            memory.append_turn(turn(&format!("t{i}")));
        }
        let history = memory.history();
        assert_eq!(history.len(), HISTORY_KEEP);
        assert_eq!(history.last().unwrap().content, format!("t{HISTORY_CAP}"));
    }

    #[test]
    fn test_recent_turns_returns_oldest_first() {
        let memory = memory();
        for i in 0..5 {
            memory.append_turn(turn(&format!("t{i}")));
        }
        let recent = memory.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "t3");
        assert_eq!(recent[1].content, "t4");
    }

    #[test]
    fn test_session_lifecycle() {
        let memory = memory();
        assert!(memory.active_session().is_none());

        let session = memory.start_session("learning");
        assert_eq!(memory.active_session().unwrap().id, session.id);

        let ended = memory.end_session().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert!(memory.active_session().is_none());
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let memory = memory();
        memory.start_session("learning");
        let first = memory.end_session().unwrap();
        let second = memory.end_session().unwrap();
        assert_eq!(first.ended_at, second.ended_at);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let memory = MemorySystem::new(store.clone());
        memory.append_message(Message::user("hello"));
        memory.append_turn(turn("hello"));
        memory.start_session("learning");
        memory.save_to_storage().await.unwrap();

        let restored = MemorySystem::new(store);
        restored.load_from_storage().await.unwrap();
        assert_eq!(restored.message_count(), 1);
        assert_eq!(restored.history().len(), 1);
        assert!(restored.active_session().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_component_degrades_alone() {
        let store = Arc::new(InMemoryStore::new());
        let memory = MemorySystem::new(store.clone());
        memory.append_turn(turn("survives"));
        memory.save_to_storage().await.unwrap();

        // Clobber just the message log with a wrong-shaped value.
        store.put(KEY_MESSAGES, json!("not a list")).await.unwrap();

        let restored = MemorySystem::new(store);
        restored.load_from_storage().await.unwrap();
        assert_eq!(restored.message_count(), 0);
        assert_eq!(restored.history().len(), 1);
    }

    #[tokio::test]
    async fn test_save_surfaces_storage_failure() {
        let mut store = crate::store::MockKeyValueStore::new();
        store
            .expect_put()
            .returning(|_, _| Err(AgentError::Storage("disk full".to_string())));

        let memory = MemorySystem::new(Arc::new(store));
        memory.append_turn(turn("unsaved"));
        let err = memory.save_to_storage().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_load_degrades_when_store_errors() {
        let mut store = crate::store::MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(AgentError::Storage("read failed".to_string())));

        let memory = MemorySystem::new(Arc::new(store));
        // Every component degrades to empty instead of the load failing.
        memory.load_from_storage().await.unwrap();
        assert_eq!(memory.message_count(), 0);
        assert_eq!(memory.history().len(), 0);
        assert!(memory.active_session().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_state() {
        let store = Arc::new(InMemoryStore::new());
        let memory = MemorySystem::new(store.clone());
        memory.append_turn(turn("gone"));
        memory.start_session("learning");
        memory.save_to_storage().await.unwrap();

        memory.clear().await.unwrap();
        assert_eq!(memory.history().len(), 0);
        assert!(memory.active_session().is_none());
        assert_eq!(store.get(KEY_HISTORY).await.unwrap(), None);
    }

    #[test]
    fn test_quota_enforcement_truncates_oldest() {
        let mut log: VecDeque<String> = (0..100).map(|i| format!("entry-{i:03}")).collect();
        enforce_quota(&mut log, 300);
        assert!(!log.is_empty());
        assert!(serde_json::to_vec(&log).unwrap().len() <= 300);
        // Newest entry survives.
        assert_eq!(log.back().unwrap(), "entry-099");
    }

    #[test]
    fn test_quota_enforcement_is_idempotent() {
        let mut log: VecDeque<String> = (0..100).map(|i| format!("entry-{i:03}")).collect();
        enforce_quota(&mut log, 300);
        let after_first: Vec<String> = log.iter().cloned().collect();
        enforce_quota(&mut log, 300);
        let after_second: Vec<String> = log.iter().cloned().collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_quota_enforcement_leaves_small_logs_alone() {
        let mut log: VecDeque<String> = VecDeque::from(vec!["tiny".to_string()]);
        enforce_quota(&mut log, COMPONENT_QUOTA_BYTES);
        assert_eq!(log.len(), 1);
    }
}
