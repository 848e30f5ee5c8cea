//! Fusion engine: fragments in, conversation messages out
//!
//! Owns one `ThoughtBuffer` per source plus the deduplication guard, and
//! applies the emission policy against the session store. All state is
//! mutated from whichever single thread drives `ingest`/`tick`; the clock
//! decides every timing question so tests can replay exact scenarios.

use super::config::FusionConfig;
use super::thought::{FlushedThought, ThoughtBuffer};
use crate::session::{ConversationMessage, SessionStore, Source, TranscriptFragment};
use crate::text::{normalize, stitch, DeduplicationGuard};
use crate::utils::Clock;
use crate::{MurmurError, Result};
use chrono::DateTime;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Base confidence for a single-fragment message.
const BASE_CONFIDENCE: f64 = 0.6;
/// Confidence added per contributing fragment.
const PER_FRAGMENT_CONFIDENCE: f64 = 0.1;
/// Fragment-count heuristic cap, before the completeness bonus.
const FRAGMENT_CONFIDENCE_CAP: f64 = 0.9;
/// Bonus for sentence-terminal punctuation.
const COMPLETENESS_BONUS: f64 = 0.1;

/// What happened to a flushed thought.
#[derive(Debug, Clone)]
pub enum FusionOutcome {
    /// A brand-new message was appended to the session.
    Created {
        session_id: String,
        message: ConversationMessage,
    },

    /// A recent message from the same source grew in place.
    Updated {
        session_id: String,
        message: ConversationMessage,
    },

    /// The flush was absorbed without touching the session.
    Discarded { source: Source, reason: DiscardReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Below the minimum emit length.
    TooShort,
    /// A near-identical message was emitted within the dedup window.
    Duplicate,
    /// Already a substring of the previous message.
    AlreadyContained,
}

/// Per-session fusion pipeline.
pub struct FusionEngine {
    config: FusionConfig,
    clock: Arc<dyn Clock>,
    store: SessionStore,
    session_id: String,
    buffers: HashMap<Source, ThoughtBuffer>,
    dedup: DeduplicationGuard,
}

impl FusionEngine {
    pub fn new(
        config: FusionConfig,
        clock: Arc<dyn Clock>,
        store: SessionStore,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        config.validate().map_err(MurmurError::ConfigError)?;
        let dedup = DeduplicationGuard::new(config.dedup_expiry);
        Ok(Self {
            config,
            clock,
            store,
            session_id: session_id.into(),
            buffers: HashMap::new(),
            dedup,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Feed one fragment through normalization, stitching and the flush
    /// triggers. May produce up to two outcomes: a pause-gap flush of the
    /// previous thought, then an immediate flush of the new one.
    pub fn ingest(&mut self, fragment: &TranscriptFragment) -> Result<Vec<FusionOutcome>> {
        let now = self.clock.now();
        let cleaned = normalize::clean(&fragment.text);
        if cleaned.is_empty() {
            debug!(source = ?fragment.source, "dropping empty fragment");
            return Ok(Vec::new());
        }

        let source = fragment.source;
        self.buffers
            .entry(source)
            .or_insert_with(|| ThoughtBuffer::new(source));

        let mut outcomes = Vec::new();

        // A natural pause ended the previous thought; flush it before the
        // new fragment starts a fresh accumulation cycle.
        let pause_gap = {
            let buffer = &self.buffers[&source];
            !buffer.is_empty() && buffer.pause_elapsed(now, self.config.thought_pause)
        };
        if pause_gap {
            if let Some(thought) = self.buffer_mut(source).take() {
                if let Some(outcome) = self.emit(thought, now)? {
                    outcomes.push(outcome);
                }
            }
        }

        let config = self.config.clone();
        let changed = self.buffer_mut(source).ingest(&cleaned, now, &config);
        if changed {
            debug!(source = ?source, buffer = %self.buffers[&source].accumulated(), "fragment merged");
        }

        if self.buffers[&source].should_flush_now(now, &self.config) {
            if let Some(thought) = self.buffer_mut(source).take() {
                if let Some(outcome) = self.emit(thought, now)? {
                    outcomes.push(outcome);
                }
            }
        }

        Ok(outcomes)
    }

    /// Poll debounce deadlines. The production driver calls this on a short
    /// interval; tests call it with a manual clock.
    pub fn tick(&mut self) -> Result<Vec<FusionOutcome>> {
        let now = self.clock.now();
        let due: Vec<Source> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.deadline_elapsed(now))
            .map(|(s, _)| *s)
            .collect();

        let mut outcomes = Vec::new();
        for source in due {
            if let Some(thought) = self.buffer_mut(source).take() {
                if let Some(outcome) = self.emit(thought, now)? {
                    outcomes.push(outcome);
                }
            }
        }
        Ok(outcomes)
    }

    /// Teardown: drop in-flight buffers without flushing so no stale message
    /// is posted after capture stops.
    pub fn discard_buffers(&mut self) {
        for buffer in self.buffers.values_mut() {
            if !buffer.is_empty() {
                debug!(source = ?buffer.source(), "discarding buffered content on teardown");
            }
            buffer.discard();
        }
    }

    fn buffer_mut(&mut self, source: Source) -> &mut ThoughtBuffer {
        self.buffers
            .entry(source)
            .or_insert_with(|| ThoughtBuffer::new(source))
    }

    /// Emission policy for one flushed thought: dedup, then grow the
    /// previous same-source message if it is recent enough, otherwise append
    /// a new message.
    fn emit(
        &mut self,
        thought: FlushedThought,
        now: DateTime<Utc>,
    ) -> Result<Option<FusionOutcome>> {
        let text = thought.text.trim();
        let source = thought.source;

        if text.chars().count() < self.config.min_emit_length {
            debug!(source = ?source, "discarding trivial flush");
            return Ok(Some(FusionOutcome::Discarded {
                source,
                reason: DiscardReason::TooShort,
            }));
        }

        if self.dedup.is_duplicate(text, now) {
            debug!(source = ?source, "suppressing duplicate flush");
            return Ok(Some(FusionOutcome::Discarded {
                source,
                reason: DiscardReason::Duplicate,
            }));
        }

        let kind = source.message_kind();

        if let Some(last) = self.store.latest_message(&self.session_id, source, kind) {
            if now - last.timestamp <= self.config.max_concatenation_time {
                if last.content.contains(text) {
                    return Ok(Some(FusionOutcome::Discarded {
                        source,
                        reason: DiscardReason::AlreadyContained,
                    }));
                }

                let merged = stitch::merge(&last.content, text);
                let confidence =
                    (last.confidence + self.config.confidence_bump).min(self.config.confidence_cap);
                let updated = match self.store.update_message_content(
                    &self.session_id,
                    last.id,
                    &merged,
                    confidence,
                    now,
                ) {
                    Ok(updated) => updated,
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "dropping flush for missing session");
                        return Ok(None);
                    }
                };
                // register the merged content so a re-flush of the grown
                // bubble is still suppressed
                self.dedup.register(&merged, now);
                debug!(message_id = %updated.id, "grew previous message in place");
                return Ok(Some(FusionOutcome::Updated {
                    session_id: self.session_id.clone(),
                    message: updated,
                }));
            }
        }

        let mut confidence = (BASE_CONFIDENCE
            + PER_FRAGMENT_CONFIDENCE * thought.fragment_count as f64)
            .min(FRAGMENT_CONFIDENCE_CAP);
        if normalize::is_complete_sentence(text) {
            confidence = (confidence + COMPLETENESS_BONUS).min(self.config.confidence_cap);
        }

        let message = ConversationMessage::new(kind, source, text, confidence, now);
        if let Err(e) = self.store.append_message(&self.session_id, message.clone()) {
            // session was torn down underneath us; drop the thought rather
            // than kill the pipeline
            warn!(session_id = %self.session_id, error = %e, "dropping flush for missing session");
            return Ok(None);
        }
        self.dedup.register(text, now);
        debug!(message_id = %message.id, confidence, "appended new message");

        Ok(Some(FusionOutcome::Created {
            session_id: self.session_id.clone(),
            message,
        }))
    }
}
