//! Conversation data model
//!
//! Field names serialize to the camelCase JSON the storage backend speaks.
//! Timestamps cross the wire as epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin channel of a fragment or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Microphone,
    Loopback,
}

impl Source {
    /// Conversation role this channel maps to: the microphone is the user
    /// speaking, loopback is the other party's audio.
    pub fn message_kind(self) -> MessageKind {
        match self {
            Source::Microphone => MessageKind::User,
            Source::Loopback => MessageKind::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
}

/// Save lifecycle of a message. Moves forward only
/// (pending -> saving -> saved | failed); failed -> saving is the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceState {
    #[default]
    Pending,
    Saving,
    Saved,
    Failed,
}

/// One partial or final speech-to-text delta from a capture source.
/// Ephemeral: produced by capture, consumed once by the fusion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    #[serde(rename = "sourceId")]
    pub source: Source,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn new(text: impl Into<String>, source: Source, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            source,
            timestamp,
            is_final: false,
        }
    }

    pub fn finalized(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// A finalized conversation message owned by a session's message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub source: Source,
    pub content: String,
    pub confidence: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "persistenceState", default)]
    pub persistence_state: PersistenceState,
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
    #[serde(
        rename = "lastSaveAttempt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_save_attempt: Option<DateTime<Utc>>,
    #[serde(rename = "saveError", default, skip_serializing_if = "Option::is_none")]
    pub save_error: Option<String>,
    /// Interim UI placeholder; never persisted.
    #[serde(rename = "isPreview", default, skip_serializing_if = "is_false")]
    pub is_preview: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl ConversationMessage {
    pub fn new(
        kind: MessageKind,
        source: Source,
        content: impl Into<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            content: content.into(),
            confidence,
            timestamp,
            persistence_state: PersistenceState::Pending,
            retry_count: 0,
            last_save_attempt: None,
            save_error: None,
            is_preview: false,
        }
    }

    pub fn preview(mut self) -> Self {
        self.is_preview = true;
        self
    }
}

/// A conversation session: ordered message list plus lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub name: String,
    #[serde(rename = "startTime", with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(
        rename = "endTime",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub end_time: Option<DateTime<Utc>>,
    pub messages: Vec<ConversationMessage>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

impl ConversationSession {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            start_time,
            end_time: None,
            messages: Vec::new(),
            is_active: true,
        }
    }
}
