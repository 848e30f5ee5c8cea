pub mod dedup;
pub mod normalize;
pub mod stitch;

pub use dedup::{fingerprint, DeduplicationGuard};
pub use normalize::{clean, is_complete_sentence};
pub use stitch::merge;
