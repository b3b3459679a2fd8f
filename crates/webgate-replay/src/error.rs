use thiserror::Error;
use webgate_driver::DriverError;
use webgate_security::SecurityError;
use webgate_session::SessionError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("session '{session_id}' is already recording")]
    RecordingActive { session_id: String },

    #[error("session '{session_id}' has no active recording")]
    NoActiveRecording { session_id: String },

    #[error("session '{session_id}' already has an active playback")]
    PlaybackActive { session_id: String },

    #[error("macro '{id}' not found")]
    MacroNotFound { id: String },

    #[error("macro storage error: {message}")]
    Storage { message: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

impl ReplayError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
