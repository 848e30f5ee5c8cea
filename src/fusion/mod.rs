pub mod config;
pub mod engine;
pub mod thought;

pub use config::FusionConfig;
pub use engine::{DiscardReason, FusionEngine, FusionOutcome};
pub use thought::{FlushedThought, ThoughtBuffer};
