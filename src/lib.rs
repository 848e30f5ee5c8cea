pub mod fusion;
pub mod persist;
pub mod session;
pub mod stream;
pub mod text;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MurmurError {
    #[error("Capture device error: {0}")]
    CaptureDeviceError(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fallback store error: {0}")]
    FallbackError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for MurmurError {
    fn from(e: std::io::Error) -> Self {
        MurmurError::IOError(e.to_string())
    }
}

impl MurmurError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Device errors may require user intervention but never kill the pipeline
            MurmurError::CaptureDeviceError(_) => true,
            // Backend failures are retried with backoff
            MurmurError::BackendError(_) => true,
            // Persistence failures degrade to a per-message failed flag
            MurmurError::PersistenceError(_) => true,
            MurmurError::SessionError(_) => true,
            MurmurError::ChannelError(_) => false,
            MurmurError::ConfigError(_) => false,
            MurmurError::FallbackError(_) => true,
            MurmurError::IOError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            MurmurError::CaptureDeviceError(_) => {
                "Capture device error. Please check your microphone or audio permissions.".to_string()
            }
            MurmurError::BackendError(_) => {
                "Storage backend is unreachable. Messages will be retried.".to_string()
            }
            MurmurError::PersistenceError(_) => {
                "A message could not be saved. It has been kept locally.".to_string()
            }
            MurmurError::SessionError(_) => {
                "Conversation session not found.".to_string()
            }
            MurmurError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            MurmurError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            MurmurError::FallbackError(_) => {
                "Local fallback storage failed. Unsaved messages may be lost on exit.".to_string()
            }
            MurmurError::IOError(_) => {
                "File system error occurred.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
