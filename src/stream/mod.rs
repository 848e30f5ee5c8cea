pub mod bus;
pub mod events;

pub use bus::PipelineChannels;
pub use events::{StreamAssembler, StreamEvent};
