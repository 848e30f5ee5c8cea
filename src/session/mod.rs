pub mod store;
pub mod types;

pub use store::SessionStore;
pub use types::{
    ConversationMessage, ConversationSession, MessageKind, PersistenceState, Source,
    TranscriptFragment,
};
