//! Per-source accumulation buffer
//!
//! One `ThoughtBuffer` per capture source merges incoming fragments into a
//! running thought and tracks the timing state that decides when the thought
//! is done. Timers are plain deadlines; the engine polls them via `tick`, so
//! there is no timer bookkeeping to cancel and tests can drive time manually.

use super::config::FusionConfig;
use crate::session::Source;
use crate::text::{normalize, stitch};
use chrono::{DateTime, Duration, Utc};

/// Accumulated text handed to the emission policy on flush.
#[derive(Debug, Clone)]
pub struct FlushedThought {
    pub source: Source,
    pub text: String,
    /// Distinct fragments that contributed to the buffer.
    pub fragment_count: usize,
    pub started_at: DateTime<Utc>,
}

/// Accumulation state machine: Idle -> Accumulating -> flush -> Idle.
#[derive(Debug)]
pub struct ThoughtBuffer {
    source: Source,
    accumulated: String,
    fragments: Vec<String>,
    started_at: Option<DateTime<Utc>>,
    last_fragment_at: Option<DateTime<Utc>>,
    flush_deadline: Option<DateTime<Utc>>,
}

impl ThoughtBuffer {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            accumulated: String::new(),
            fragments: Vec::new(),
            started_at: None,
            last_fragment_at: None,
            flush_deadline: None,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Buffer age since the first fragment of the current thought.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        match self.started_at {
            Some(started) => now - started,
            None => Duration::zero(),
        }
    }

    /// True when a natural pause elapsed since the last fragment, meaning
    /// any accumulated content belongs to a finished thought.
    pub fn pause_elapsed(&self, now: DateTime<Utc>, pause: Duration) -> bool {
        match self.last_fragment_at {
            Some(last) => now - last > pause,
            None => false,
        }
    }

    /// Merge a cleaned fragment into the buffer. Returns true if the buffer
    /// changed; pure duplicates leave it untouched and do not reschedule the
    /// debounce deadline.
    pub fn ingest(&mut self, text: &str, now: DateTime<Utc>, config: &FusionConfig) -> bool {
        if self.accumulated.is_empty() {
            self.started_at = Some(now);
        }
        self.last_fragment_at = Some(now);

        let merged = stitch::merge(&self.accumulated, text);
        if merged == self.accumulated {
            return false;
        }

        self.accumulated = merged;
        self.fragments.push(text.to_string());
        self.flush_deadline = Some(now + config.thought_pause);
        true
    }

    /// Immediate-flush conditions, checked after each fragment, in order:
    /// a complete sizeable sentence that has had time to settle, or a
    /// sizeable buffer that has been accumulating too long.
    pub fn should_flush_now(&self, now: DateTime<Utc>, config: &FusionConfig) -> bool {
        if self.accumulated.chars().count() < config.min_sizeable_content {
            return false;
        }
        if normalize::is_complete_sentence(&self.accumulated) && self.age(now) > config.min_sentence_age
        {
            return true;
        }
        self.age(now) >= config.max_buffer_duration
    }

    /// Debounce deadline reached with content still buffered?
    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.flush_deadline, Some(deadline) if now >= deadline) && !self.is_empty()
    }

    /// Flush: hand out the accumulated thought and reset to Idle. All state
    /// is cleared before any new fragment can touch this source's buffer.
    pub fn take(&mut self) -> Option<FlushedThought> {
        if self.accumulated.is_empty() {
            self.discard();
            return None;
        }
        let thought = FlushedThought {
            source: self.source,
            text: std::mem::take(&mut self.accumulated),
            fragment_count: self.fragments.len(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
        };
        self.fragments.clear();
        self.started_at = None;
        self.last_fragment_at = None;
        self.flush_deadline = None;
        Some(thought)
    }

    /// Teardown path: drop accumulated content without emitting anything.
    pub fn discard(&mut self) {
        self.accumulated.clear();
        self.fragments.clear();
        self.started_at = None;
        self.last_fragment_at = None;
        self.flush_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> ThoughtBuffer {
        ThoughtBuffer::new(Source::Microphone)
    }

    #[test]
    fn test_first_fragment_starts_accumulating() {
        let mut buf = buffer();
        let now = Utc::now();
        let config = FusionConfig::default();

        assert!(buf.is_empty());
        assert!(buf.ingest("hello there", now, &config));
        assert!(!buf.is_empty());
        assert_eq!(buf.accumulated(), "hello there");
        assert_eq!(buf.age(now), Duration::zero());
    }

    #[test]
    fn test_duplicate_fragment_does_not_reschedule() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        assert!(buf.ingest("hello there", now, &config));
        let later = now + Duration::milliseconds(500);
        assert!(!buf.ingest("hello there", later, &config));

        // deadline still anchored to the first fragment
        assert!(buf.deadline_elapsed(now + config.thought_pause));
    }

    #[test]
    fn test_growing_fragments_extend_buffer() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("Hello there", now, &config);
        buf.ingest("Hello there, how", now + Duration::milliseconds(400), &config);
        buf.ingest(
            "Hello there, how are you?",
            now + Duration::milliseconds(600),
            &config,
        );

        assert_eq!(buf.accumulated(), "Hello there, how are you?");
    }

    #[test]
    fn test_complete_sentence_needs_size_and_age() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("This is a complete sentence, is it not?", now, &config);
        // complete and sizeable, but too young
        assert!(!buf.should_flush_now(now + Duration::seconds(1), &config));
        assert!(buf.should_flush_now(now + Duration::milliseconds(2100), &config));
    }

    #[test]
    fn test_small_buffer_never_flushes_early() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("Short phrase.", now, &config);
        assert!(!buf.should_flush_now(now + Duration::seconds(5), &config));
    }

    #[test]
    fn test_max_duration_flushes_incomplete_sentence() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("a continuously talking source that never pauses and", now, &config);
        assert!(!buf.should_flush_now(now + Duration::seconds(9), &config));
        assert!(buf.should_flush_now(now + Duration::seconds(10), &config));
    }

    #[test]
    fn test_pause_detection() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("hello", now, &config);
        assert!(!buf.pause_elapsed(now + Duration::seconds(2), config.thought_pause));
        assert!(buf.pause_elapsed(now + Duration::seconds(3), config.thought_pause));
    }

    #[test]
    fn test_take_clears_all_state() {
        let mut buf = buffer();
        let config = FusionConfig::default();
        let now = Utc::now();

        buf.ingest("hello there", now, &config);
        buf.ingest("hello there, friend", now + Duration::milliseconds(300), &config);

        let thought = buf.take().unwrap();
        assert_eq!(thought.text, "hello there, friend");
        assert_eq!(thought.fragment_count, 2);
        assert_eq!(thought.source, Source::Microphone);

        assert!(buf.is_empty());
        assert!(buf.take().is_none());
        assert!(!buf.deadline_elapsed(now + Duration::seconds(60)));
    }

    #[test]
    fn test_discard_emits_nothing() {
        let mut buf = buffer();
        let config = FusionConfig::default();

        buf.ingest("stale content", Utc::now(), &config);
        buf.discard();
        assert!(buf.take().is_none());
    }
}
