//! Local fallback mirror for messages the backend refused
//!
//! When a message exhausts its retries it is written to a per-session JSON
//! file so nothing is lost outright. On the next startup the mirrored
//! messages are offered back for reconciliation with the backend.

use super::backend::StorageBackend;
use crate::session::ConversationMessage;
use crate::{MurmurError, Result};
use futures::future::join_all;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const FILE_PREFIX: &str = "murmur_fallback_";

pub struct FallbackStore {
    dir: PathBuf,
}

impl FallbackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| MurmurError::FallbackError(format!("cannot create {:?}: {}", dir, e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // session ids are uuids; no path-hostile characters to escape
        self.dir.join(format!("{}{}.json", FILE_PREFIX, session_id))
    }

    /// Append a message to the session's mirror file. Re-mirroring the same
    /// message replaces the earlier copy.
    pub fn mirror(&self, session_id: &str, message: &ConversationMessage) -> Result<()> {
        let path = self.path_for(session_id);
        let mut messages = read_messages(&path)?;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        let json = serde_json::to_string_pretty(&messages)
            .map_err(|e| MurmurError::FallbackError(format!("serialize failed: {}", e)))?;
        fs::write(&path, json)
            .map_err(|e| MurmurError::FallbackError(format!("write {:?} failed: {}", path, e)))?;
        Ok(())
    }

    /// Session ids with mirrored messages awaiting reconciliation.
    pub fn pending_sessions(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| MurmurError::FallbackError(format!("read {:?} failed: {}", self.dir, e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| MurmurError::FallbackError(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(session_id) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                sessions.push(session_id.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Remove and return the mirrored messages for a session.
    pub fn take(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let path = self.path_for(session_id);
        let messages = read_messages(&path)?;
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| MurmurError::FallbackError(format!("remove {:?} failed: {}", path, e)))?;
        }
        Ok(messages)
    }

    /// Push every mirrored message back to the backend. Sessions that still
    /// fail are re-mirrored untouched for the next attempt.
    pub async fn reconcile(&self, backend: &dyn StorageBackend) -> Result<usize> {
        let sessions = self.pending_sessions()?;
        if sessions.is_empty() {
            return Ok(0);
        }

        let mut batches = Vec::new();
        for session_id in sessions {
            let messages = self.take(&session_id)?;
            batches.push((session_id, messages));
        }

        let saves = batches.iter().map(|(session_id, messages)| async move {
            backend.batch_save_messages(session_id, messages).await
        });
        let results = join_all(saves).await;

        let mut reconciled = 0;
        for ((session_id, messages), result) in batches.iter().zip(results) {
            match result {
                Ok(()) => {
                    info!(session_id = %session_id, count = messages.len(), "reconciled fallback messages");
                    reconciled += messages.len();
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "fallback reconciliation failed, keeping mirror");
                    for message in messages {
                        self.mirror(session_id, message)?;
                    }
                }
            }
        }
        Ok(reconciled)
    }
}

fn read_messages(path: &Path) -> Result<Vec<ConversationMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let json = fs::read_to_string(path)
        .map_err(|e| MurmurError::FallbackError(format!("read {:?} failed: {}", path, e)))?;
    serde_json::from_str(&json)
        .map_err(|e| MurmurError::FallbackError(format!("corrupt mirror {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::backend::InMemoryBackend;
    use crate::session::{MessageKind, Source};
    use chrono::Utc;
    use uuid::Uuid;

    fn temp_store() -> FallbackStore {
        let dir = std::env::temp_dir().join(format!("murmur_fallback_test_{}", Uuid::new_v4()));
        FallbackStore::new(dir).unwrap()
    }

    fn message(content: &str) -> ConversationMessage {
        ConversationMessage::new(MessageKind::User, Source::Microphone, content, 0.8, Utc::now())
    }

    #[test]
    fn test_mirror_and_take_round_trip() {
        let store = temp_store();
        let msg = message("lost message");

        store.mirror("session-1", &msg).unwrap();
        assert_eq!(store.pending_sessions().unwrap(), vec!["session-1"]);

        let taken = store.take("session-1").unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].id, msg.id);
        assert_eq!(taken[0].content, "lost message");

        // the mirror is consumed
        assert!(store.pending_sessions().unwrap().is_empty());
        assert!(store.take("session-1").unwrap().is_empty());
    }

    #[test]
    fn test_remirror_replaces_same_message() {
        let store = temp_store();
        let mut msg = message("v1");
        store.mirror("session-1", &msg).unwrap();
        msg.content = "v2".to_string();
        store.mirror("session-1", &msg).unwrap();

        let taken = store.take("session-1").unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].content, "v2");
    }

    #[tokio::test]
    async fn test_reconcile_pushes_to_backend() {
        let store = temp_store();
        let backend = InMemoryBackend::new();
        store.mirror("session-1", &message("one")).unwrap();
        store.mirror("session-1", &message("two")).unwrap();

        let reconciled = store.reconcile(&backend).await.unwrap();
        assert_eq!(reconciled, 2);
        assert_eq!(backend.saved_messages("session-1").len(), 2);
        assert!(store.pending_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_mirror_on_failure() {
        let store = temp_store();
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        store.mirror("session-1", &message("one")).unwrap();

        let reconciled = store.reconcile(&backend).await.unwrap();
        assert_eq!(reconciled, 0);
        assert_eq!(store.pending_sessions().unwrap(), vec!["session-1"]);
    }
}
