use thiserror::Error;
use webgate_driver::DriverError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session capacity reached ({max} active)")]
    CapacityExceeded { max: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("session '{id}' not found")]
    SessionNotFound { id: String },

    #[error("session '{id}' is destroyed")]
    SessionDestroyed { id: String },

    #[error("session '{id}' already has an active trace")]
    TraceAlreadyActive { id: String },

    #[error("session '{id}' has no active trace")]
    NoActiveTrace { id: String },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type SessionResult<T> = Result<T, SessionError>;
