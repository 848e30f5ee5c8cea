//! Explicitly-owned session registry
//!
//! One `SessionStore` is created by the application and handed by clone to
//! the fusion engine and the persistence queue; there is no ambient global
//! state. Message mutation happens in place inside the owning session's
//! ordered list.

use super::types::{
    ConversationMessage, ConversationSession, MessageKind, PersistenceState, Source,
};
use crate::{MurmurError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, name: impl Into<String>, now: DateTime<Utc>) -> ConversationSession {
        let session = ConversationSession::new(name, now);
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Insert a session as-is (load path, fallback reconciliation).
    pub fn insert_session(&self, session: ConversationSession) {
        self.sessions.write().insert(session.id.clone(), session);
    }

    pub fn end_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| MurmurError::SessionError(format!("unknown session {}", session_id)))?;
        session.is_active = false;
        session.end_time = Some(now);
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Snapshot of one session.
    pub fn session(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Snapshot of all sessions, ordered by start time.
    pub fn sessions(&self) -> Vec<ConversationSession> {
        let mut all: Vec<ConversationSession> = self.sessions.read().values().cloned().collect();
        all.sort_by_key(|s| s.start_time);
        all
    }

    /// Replace all sessions with backend-loaded state. Loaded messages are
    /// durable by definition, so their persistence state is normalized.
    pub fn load_from(&self, loaded: Vec<ConversationSession>) {
        let mut sessions = self.sessions.write();
        sessions.clear();
        for mut session in loaded {
            for message in &mut session.messages {
                message.persistence_state = PersistenceState::Saved;
            }
            sessions.insert(session.id.clone(), session);
        }
    }

    pub fn append_message(&self, session_id: &str, message: ConversationMessage) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| MurmurError::SessionError(format!("unknown session {}", session_id)))?;
        session.messages.push(message);
        Ok(())
    }

    pub fn message(&self, session_id: &str, message_id: Uuid) -> Option<ConversationMessage> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|s| s.messages.iter().find(|m| m.id == message_id))
            .cloned()
    }

    pub fn message_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.messages.len())
            .unwrap_or(0)
    }

    /// Most recent non-preview message with the given source and kind.
    pub fn latest_message(
        &self,
        session_id: &str,
        source: Source,
        kind: MessageKind,
    ) -> Option<ConversationMessage> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|s| {
                s.messages
                    .iter()
                    .rev()
                    .find(|m| m.source == source && m.kind == kind && !m.is_preview)
            })
            .cloned()
    }

    /// In-place content update (single-bubble growth during continuous
    /// speech). The message carries new content, so it re-enters the save
    /// lifecycle from the start.
    pub fn update_message_content(
        &self,
        session_id: &str,
        message_id: Uuid,
        content: &str,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<ConversationMessage> {
        let mut sessions = self.sessions.write();
        let message = sessions
            .get_mut(session_id)
            .ok_or_else(|| MurmurError::SessionError(format!("unknown session {}", session_id)))?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                MurmurError::SessionError(format!("unknown message {} in {}", message_id, session_id))
            })?;

        message.content = content.to_string();
        message.confidence = confidence;
        message.timestamp = timestamp;
        message.persistence_state = PersistenceState::Pending;
        message.retry_count = 0;
        message.save_error = None;
        Ok(message.clone())
    }

    /// Explicit user deletion; the only way a message leaves a session.
    pub fn delete_message(&self, session_id: &str, message_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| MurmurError::SessionError(format!("unknown session {}", session_id)))?;
        let before = session.messages.len();
        session.messages.retain(|m| m.id != message_id);
        if session.messages.len() == before {
            return Err(MurmurError::SessionError(format!(
                "unknown message {} in {}",
                message_id, session_id
            )));
        }
        Ok(())
    }

    /// Transition into `Saving`. Returns false when the message is already
    /// saved, already being saved, is a preview, or has been deleted - the
    /// caller drops the request in all of those cases.
    pub fn begin_save(&self, session_id: &str, message_id: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        let Some(message) = sessions
            .get_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        if message.is_preview {
            return false;
        }
        match message.persistence_state {
            PersistenceState::Pending | PersistenceState::Failed => {
                message.persistence_state = PersistenceState::Saving;
                true
            }
            PersistenceState::Saving | PersistenceState::Saved => false,
        }
    }

    /// Transition into `Saved`. Only a message still in `Saving` moves; a
    /// completion arriving after the content changed again is stale and must
    /// not clobber the newer generation's `Pending` state. Idempotent across
    /// concurrent batch completions arriving in any order.
    pub fn complete_save(&self, session_id: &str, message_id: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        let Some(message) = sessions
            .get_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        match message.persistence_state {
            PersistenceState::Saving => {
                message.persistence_state = PersistenceState::Saved;
                message.save_error = None;
                true
            }
            PersistenceState::Saved => true,
            PersistenceState::Pending | PersistenceState::Failed => false,
        }
    }

    /// Transition into `Failed` with the attempt bookkeeping the retry path
    /// relies on. Guarded like `complete_save`: a failure report for content
    /// that has since been replaced leaves the newer generation untouched.
    pub fn fail_save(
        &self,
        session_id: &str,
        message_id: Uuid,
        retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut sessions = self.sessions.write();
        let Some(message) = sessions
            .get_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        if message.persistence_state != PersistenceState::Saving {
            return false;
        }
        message.persistence_state = PersistenceState::Failed;
        message.retry_count = retry_count;
        message.last_save_attempt = Some(now);
        message.save_error = Some(error.to_string());
        true
    }

    /// Everything that still needs a save: used at startup to re-queue
    /// messages that were not durable at last shutdown.
    pub fn unsaved_messages(&self) -> Vec<(String, Uuid)> {
        let sessions = self.sessions.read();
        let mut unsaved = Vec::new();
        for session in sessions.values() {
            for message in &session.messages {
                if !message.is_preview && message.persistence_state != PersistenceState::Saved {
                    unsaved.push((session.id.clone(), message.id));
                }
            }
        }
        unsaved
    }
}
