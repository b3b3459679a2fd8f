use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerformanceError {
    #[error("resource exhausted: {resource} at {current}/{limit}")]
    ResourceExhausted {
        resource: &'static str,
        current: u64,
        limit: u64,
    },

    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("temp store error: {message}")]
    TempStore { message: String },
}

pub type PerformanceResult<T> = Result<T, PerformanceError>;
