use thiserror::Error;

/// Typed failures surfaced by every driver operation.
///
/// Variants map one-to-one onto the error subcategories reported in tool
/// envelopes, so the server layer can categorise without string matching
/// (JavaScript exceptions are the one exception: the browser only gives us
/// the exception text, see [`DriverError::is_reference_error`]).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("operation '{op}' timed out after {ms}ms")]
    Timeout { op: String, ms: u64 },

    #[error("no element matches selector '{selector}'")]
    ElementNotFound { selector: String },

    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("no option with value '{value}' in select '{selector}'")]
    OptionNotFound { selector: String, value: String },

    #[error("element '{selector}' is not a <select>")]
    NotSelectElement { selector: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("script evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("failed to launch browser: {message}")]
    LaunchFailed { message: String },

    #[error("browser context is closed")]
    ContextClosed,

    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl DriverError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn timeout(op: impl Into<String>, ms: u64) -> Self {
        Self::Timeout {
            op: op.into(),
            ms,
        }
    }

    /// True when an evaluation failure looks like a reference error.
    pub fn is_reference_error(&self) -> bool {
        matches!(self, Self::Evaluation { message } if message.contains("ReferenceError"))
    }

    /// True when an evaluation failure looks like a syntax error.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Self::Evaluation { message } if message.contains("SyntaxError"))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_classification() {
        let err = DriverError::Evaluation {
            message: "Uncaught ReferenceError: foo is not defined".into(),
        };
        assert!(err.is_reference_error());
        assert!(!err.is_syntax_error());

        let err = DriverError::Evaluation {
            message: "SyntaxError: Unexpected token ')'".into(),
        };
        assert!(err.is_syntax_error());
    }
}
