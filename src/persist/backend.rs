//! Storage backend RPC surface
//!
//! The queue talks to an abstract backend; the real implementation lives on
//! the other side of an RPC boundary and may take arbitrarily long or fail
//! transiently. `InMemoryBackend` is the scriptable stand-in used by tests
//! and the demo binary.

use crate::session::{ConversationMessage, ConversationSession, PersistenceState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Worth retrying with backoff.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Retrying cannot help (rejected payload, schema mismatch).
    #[error("permanent backend failure: {0}")]
    Permanent(String),

    /// The backend is unreachable.
    #[error("backend offline")]
    Offline,
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Offline)
    }
}

/// Granular update payload for `update_message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Abstract persistence RPC contract (backend-agnostic).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save_message(
        &self,
        session_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), BackendError>;

    async fn batch_save_messages(
        &self,
        session_id: &str,
        messages: &[ConversationMessage],
    ) -> Result<(), BackendError>;

    async fn update_message(
        &self,
        session_id: &str,
        message_id: Uuid,
        update: &MessageUpdate,
    ) -> Result<(), BackendError>;

    async fn delete_message(&self, session_id: &str, message_id: Uuid)
        -> Result<(), BackendError>;

    async fn load_sessions(&self) -> Result<Vec<ConversationSession>, BackendError>;

    /// Liveness probe for online detection.
    async fn ping(&self) -> Result<(), BackendError>;
}

#[derive(Default)]
struct InMemoryState {
    sessions: HashMap<String, ConversationSession>,
    fail_next_saves: u32,
    offline: bool,
    save_calls: u32,
    batch_calls: u32,
    ping_calls: u32,
}

/// In-memory backend with failure injection.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed session metadata so saved messages land in a named session.
    pub fn register_session(&self, session: &ConversationSession) {
        let mut state = self.state.lock();
        let mut stub = session.clone();
        stub.messages.clear();
        state.sessions.insert(stub.id.clone(), stub);
    }

    /// Fail the next `n` save attempts (individual or batch) transiently.
    pub fn fail_next_saves(&self, n: u32) {
        self.state.lock().fail_next_saves = n;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn saved_messages(&self, session_id: &str) -> Vec<ConversationMessage> {
        self.state
            .lock()
            .sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn save_call_count(&self) -> u32 {
        self.state.lock().save_calls
    }

    pub fn batch_call_count(&self) -> u32 {
        self.state.lock().batch_calls
    }

    pub fn ping_call_count(&self) -> u32 {
        self.state.lock().ping_calls
    }

    fn check_save_gate(state: &mut InMemoryState) -> Result<(), BackendError> {
        if state.offline {
            return Err(BackendError::Offline);
        }
        if state.fail_next_saves > 0 {
            state.fail_next_saves -= 1;
            return Err(BackendError::Transient("injected save failure".to_string()));
        }
        Ok(())
    }

    /// Upsert keyed by message id, so redelivery of the same message is
    /// idempotent regardless of batch completion order.
    fn store_message(state: &mut InMemoryState, session_id: &str, message: &ConversationMessage) {
        let session = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let mut stub = ConversationSession::new(session_id, message.timestamp);
                stub.id = session_id.to_string();
                stub
            });

        let mut saved = message.clone();
        saved.persistence_state = PersistenceState::Saved;
        saved.save_error = None;
        match session.messages.iter_mut().find(|m| m.id == saved.id) {
            Some(existing) => *existing = saved,
            None => session.messages.push(saved),
        }
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn save_message(
        &self,
        session_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.save_calls += 1;
        Self::check_save_gate(&mut state)?;
        Self::store_message(&mut state, session_id, message);
        Ok(())
    }

    async fn batch_save_messages(
        &self,
        session_id: &str,
        messages: &[ConversationMessage],
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.batch_calls += 1;
        Self::check_save_gate(&mut state)?;
        for message in messages {
            Self::store_message(&mut state, session_id, message);
        }
        Ok(())
    }

    async fn update_message(
        &self,
        session_id: &str,
        message_id: Uuid,
        update: &MessageUpdate,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(BackendError::Offline);
        }
        let message = state
            .sessions
            .get_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| BackendError::Permanent(format!("unknown message {}", message_id)))?;
        if let Some(content) = &update.content {
            message.content = content.clone();
        }
        if let Some(confidence) = update.confidence {
            message.confidence = confidence;
        }
        if let Some(timestamp) = update.timestamp {
            message.timestamp = timestamp;
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        session_id: &str,
        message_id: Uuid,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(BackendError::Offline);
        }
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.messages.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    async fn load_sessions(&self) -> Result<Vec<ConversationSession>, BackendError> {
        let state = self.state.lock();
        if state.offline {
            return Err(BackendError::Offline);
        }
        let mut sessions: Vec<ConversationSession> = state.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.ping_calls += 1;
        if state.offline {
            return Err(BackendError::Offline);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MessageKind, Source};

    fn message(content: &str) -> ConversationMessage {
        ConversationMessage::new(MessageKind::User, Source::Microphone, content, 0.8, Utc::now())
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let backend = InMemoryBackend::new();
        let msg = message("hello");
        backend.save_message("s1", &msg).await.unwrap();

        let sessions = backend.load_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages.len(), 1);
        assert_eq!(sessions[0].messages[0].id, msg.id);
        assert_eq!(
            sessions[0].messages[0].persistence_state,
            PersistenceState::Saved
        );
    }

    #[tokio::test]
    async fn test_resave_is_idempotent() {
        let backend = InMemoryBackend::new();
        let msg = message("hello");
        backend.save_message("s1", &msg).await.unwrap();
        backend.save_message("s1", &msg).await.unwrap();

        assert_eq!(backend.saved_messages("s1").len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let backend = InMemoryBackend::new();
        backend.fail_next_saves(2);
        let msg = message("hello");

        assert!(backend.save_message("s1", &msg).await.is_err());
        assert!(backend
            .batch_save_messages("s1", std::slice::from_ref(&msg))
            .await
            .is_err());
        assert!(backend.save_message("s1", &msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_gates_everything() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        let msg = message("hello");

        assert!(matches!(
            backend.save_message("s1", &msg).await,
            Err(BackendError::Offline)
        ));
        assert!(backend.ping().await.is_err());

        backend.set_offline(false);
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_update_message() {
        let backend = InMemoryBackend::new();
        let msg = message("hello");
        backend.save_message("s1", &msg).await.unwrap();

        let update = MessageUpdate {
            content: Some("hello there".to_string()),
            confidence: Some(0.9),
            timestamp: None,
        };
        backend.update_message("s1", msg.id, &update).await.unwrap();

        let saved = backend.saved_messages("s1");
        assert_eq!(saved[0].content, "hello there");
        assert!((saved[0].confidence - 0.9).abs() < 1e-9);
    }
}
