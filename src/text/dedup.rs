//! Short-term duplicate suppression for flushed thoughts
//!
//! Recognition sources frequently re-deliver the same phrase (web-speech
//! finals overlapping a batch transcription of the same audio). The guard
//! remembers normalized fingerprints for a short window and rejects
//! near-identical re-emissions.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Fingerprint length cap; long monologues only need a stable prefix.
const FINGERPRINT_MAX_CHARS: usize = 100;

/// Normalized, truncated key for duplicate detection: lowercase, word
/// characters only, at most 100 chars.
pub fn fingerprint(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(FINGERPRINT_MAX_CHARS)
        .collect()
}

/// Fingerprint memory with a fixed expiry window.
pub struct DeduplicationGuard {
    expiry: Duration,
    seen: HashMap<String, DateTime<Utc>>,
}

impl DeduplicationGuard {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            seen: HashMap::new(),
        }
    }

    /// True if an equivalent text was registered within the expiry window.
    pub fn is_duplicate(&mut self, text: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        let key = fingerprint(text);
        if key.is_empty() {
            return false;
        }
        self.seen.contains_key(&key)
    }

    /// Remember this text's fingerprint, refreshing its expiry.
    pub fn register(&mut self, text: &str, now: DateTime<Utc>) {
        self.prune(now);
        let key = fingerprint(text);
        if key.is_empty() {
            return;
        }
        self.seen.insert(key, now);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let expiry = self.expiry;
        self.seen.retain(|_, registered| now - *registered < expiry);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}
