//! Page events bridged out of the engine.
//!
//! Each page owns a broadcast channel; the engine pumps CDP events into it
//! and the capture pipeline consumes a subscription. Slow consumers lose the
//! oldest events (broadcast semantics), which matches the bounded-buffer
//! behaviour upstream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response bodies larger than this are never attached to events.
pub const MAX_CAPTURED_BODY_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    /// Maps a CDP console API call type onto our level set. Anything exotic
    /// (`table`, `trace`, `dir`, ...) lands on `log`.
    pub fn from_cdp_type(ty: &str) -> Self {
        match ty {
            "info" => Self::Info,
            "warning" | "warn" => Self::Warn,
            "error" | "assert" => Self::Error,
            "debug" | "verbose" => Self::Debug,
            _ => Self::Log,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// Where a console message originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub url: String,
    pub line: u64,
    pub column: u64,
}

/// One event observed on a page.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Request {
        request_id: String,
        method: String,
        url: String,
        headers: HashMap<String, String>,
        body: Option<String>,
    },
    Response {
        request_id: String,
        status: i64,
        headers: HashMap<String, String>,
        body: Option<String>,
    },
    RequestFailed {
        request_id: String,
        error: String,
    },
    Console {
        level: ConsoleLevel,
        text: String,
        location: Option<SourceLocation>,
    },
    PageError {
        message: String,
    },
    FrameNavigated {
        url: String,
        is_main_frame: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_level_mapping() {
        assert_eq!(ConsoleLevel::from_cdp_type("log"), ConsoleLevel::Log);
        assert_eq!(ConsoleLevel::from_cdp_type("warning"), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::from_cdp_type("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_cdp_type("table"), ConsoleLevel::Log);
    }
}
