//! Typed pipeline channels
//!
//! Producers and consumers are wired through explicitly-typed bounded
//! channels instead of string-keyed event names; each topic has its own
//! sender/receiver pair with a concrete payload type.

use crate::fusion::FusionOutcome;
use crate::session::TranscriptFragment;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Fragment flow from capture adapters into the fusion engine.
pub struct FragmentChannels {
    pub fragment_tx: Sender<TranscriptFragment>,
    pub fragment_rx: Receiver<TranscriptFragment>,
}

impl FragmentChannels {
    pub fn new(buffer_size: usize) -> Self {
        let (fragment_tx, fragment_rx) = bounded(buffer_size);
        Self {
            fragment_tx,
            fragment_rx,
        }
    }
}

/// Outcome flow from the fusion engine toward persistence and the UI.
pub struct OutcomeChannels {
    pub outcome_tx: Sender<FusionOutcome>,
    pub outcome_rx: Receiver<FusionOutcome>,
}

impl OutcomeChannels {
    pub fn new(buffer_size: usize) -> Self {
        let (outcome_tx, outcome_rx) = bounded(buffer_size);
        Self {
            outcome_tx,
            outcome_rx,
        }
    }
}

/// All pipeline channels in one bundle.
pub struct PipelineChannels {
    pub fragments: FragmentChannels,
    pub outcomes: OutcomeChannels,
}

impl PipelineChannels {
    pub fn new() -> Self {
        Self {
            fragments: FragmentChannels::new(64),
            outcomes: OutcomeChannels::new(64),
        }
    }
}

impl Default for PipelineChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::DiscardReason;
    use crate::session::Source;
    use chrono::Utc;

    #[test]
    fn test_fragments_flow_through() {
        let channels = PipelineChannels::new();
        let fragment = TranscriptFragment::new("hello", Source::Microphone, Utc::now());

        channels.fragments.fragment_tx.send(fragment).unwrap();
        let received = channels.fragments.fragment_rx.recv().unwrap();
        assert_eq!(received.text, "hello");
    }

    #[test]
    fn test_outcomes_flow_through() {
        let channels = PipelineChannels::new();
        let outcome = FusionOutcome::Discarded {
            source: Source::Loopback,
            reason: DiscardReason::TooShort,
        };

        channels.outcomes.outcome_tx.send(outcome).unwrap();
        assert!(matches!(
            channels.outcomes.outcome_rx.recv().unwrap(),
            FusionOutcome::Discarded { .. }
        ));
    }
}
