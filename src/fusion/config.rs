//! Timing and sizing thresholds for the fusion pipeline

use chrono::Duration;

/// Configuration for fragment accumulation and message emission.
///
/// The defaults are tuned for conversational speech; they are knobs, not a
/// contract.
#[derive(Clone, Debug)]
pub struct FusionConfig {
    /// Silence from a source after which its buffer flushes (debounce).
    pub thought_pause: Duration,

    /// Hard cap on how long one buffer may keep accumulating.
    pub max_buffer_duration: Duration,

    /// Minimum buffer age before a complete sentence triggers an early flush.
    pub min_sentence_age: Duration,

    /// Minimum accumulated length (chars) for the early-flush triggers.
    pub min_sizeable_content: usize,

    /// Flushes shorter than this (post-trim chars) are discarded.
    pub min_emit_length: usize,

    /// Window in which a new flush grows the previous same-source message
    /// instead of creating a new one.
    pub max_concatenation_time: Duration,

    /// How long a fingerprint suppresses near-identical re-emissions.
    pub dedup_expiry: Duration,

    /// Confidence added on each in-place concatenation.
    pub confidence_bump: f64,

    /// Upper bound for any confidence value.
    pub confidence_cap: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            thought_pause: Duration::milliseconds(2500),
            max_buffer_duration: Duration::seconds(10),
            min_sentence_age: Duration::seconds(2),
            min_sizeable_content: 30,
            min_emit_length: 5,
            max_concatenation_time: Duration::seconds(3),
            dedup_expiry: Duration::seconds(30),
            confidence_bump: 0.05,
            confidence_cap: 0.95,
        }
    }
}

impl FusionConfig {
    /// Shorten the pause window (fast-flush setups, tests).
    pub fn with_thought_pause(mut self, pause: Duration) -> Self {
        self.thought_pause = pause;
        self
    }

    pub fn with_max_buffer_duration(mut self, duration: Duration) -> Self {
        self.max_buffer_duration = duration;
        self
    }

    pub fn with_concatenation_window(mut self, window: Duration) -> Self {
        self.max_concatenation_time = window;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.thought_pause <= Duration::zero() {
            return Err("thought_pause must be positive".to_string());
        }
        if self.max_buffer_duration < self.thought_pause {
            return Err("max_buffer_duration must be at least thought_pause".to_string());
        }
        if self.min_emit_length > self.min_sizeable_content {
            return Err("min_emit_length cannot exceed min_sizeable_content".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_cap) {
            return Err("confidence_cap must be within [0, 1]".to_string());
        }
        Ok(())
    }
}
