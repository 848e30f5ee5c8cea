//! Per-session transcription stream contract
//!
//! Each active transcription session delivers `start`, then any number of
//! `chunk`s, terminated by exactly one of `complete`/`error`/`cancelled`.
//! `StreamAssembler` turns that stream into fragments for the fusion engine
//! and enforces the termination invariant.

use crate::session::{Source, TranscriptFragment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Event on a transcription stream channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Chunk {
        text: String,
    },
    Error {
        error: String,
    },
    Complete,
    Cancelled,
}

/// Why a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    Failed(String),
    Cancelled,
}

/// Folds one stream's events into transcript fragments.
pub struct StreamAssembler {
    source: Source,
    started: bool,
    ended: Option<StreamEnd>,
    chunk_count: usize,
}

impl StreamAssembler {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            started: false,
            ended: None,
            chunk_count: 0,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }

    /// How the stream terminated, once it has.
    pub fn end(&self) -> Option<&StreamEnd> {
        self.ended.as_ref()
    }

    /// Accept one event; chunks become fragments. Events after termination
    /// are dropped with a warning, second terminals included.
    pub fn accept(&mut self, event: StreamEvent, now: DateTime<Utc>) -> Option<TranscriptFragment> {
        if let Some(end) = &self.ended {
            warn!(source = ?self.source, end = ?end, event = ?event, "event after stream terminated");
            return None;
        }

        match event {
            StreamEvent::Start { model } => {
                debug!(source = ?self.source, model = ?model, "stream started");
                self.started = true;
                None
            }
            StreamEvent::Chunk { text } => {
                if !self.started {
                    // tolerate a missing start; treat the first chunk as one
                    self.started = true;
                }
                self.chunk_count += 1;
                Some(TranscriptFragment::new(text, self.source, now))
            }
            StreamEvent::Complete => {
                debug!(source = ?self.source, chunks = self.chunk_count, "stream complete");
                self.ended = Some(StreamEnd::Completed);
                None
            }
            StreamEvent::Error { error } => {
                warn!(source = ?self.source, error = %error, "stream failed");
                self.ended = Some(StreamEnd::Failed(error));
                None
            }
            StreamEvent::Cancelled => {
                debug!(source = ?self.source, "stream cancelled");
                self.ended = Some(StreamEnd::Cancelled);
                None
            }
        }
    }
}
