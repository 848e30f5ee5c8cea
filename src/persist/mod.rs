pub mod backend;
pub mod fallback;
pub mod queue;

pub use backend::{BackendError, InMemoryBackend, MessageUpdate, StorageBackend};
pub use fallback::FallbackStore;
pub use queue::{save_immediately, PersistenceConfig, PersistenceQueue, QueueEvent, QueueHandle};
