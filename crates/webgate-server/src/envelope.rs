//! The uniform tool result envelope and the error categorisation applied at
//! the boundary.

use serde::Serialize;
use serde_json::{json, Value};
use webgate_driver::DriverError;
use webgate_replay::ReplayError;
use webgate_security::SecurityError;
use webgate_session::SessionError;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Browser,
    Security,
    System,
}

/// Subcategory booleans carried inside the error payload.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFlags {
    pub is_timeout: bool,
    pub is_element_not_found: bool,
    pub is_network_error: bool,
    pub is_reference_error: bool,
    pub is_syntax_error: bool,
    pub is_security_error: bool,
    pub is_option_not_found: bool,
    pub is_not_select_element: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// What every tool handler returns: JSON text content with a top-level
/// `success` flag, plus optional image content.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(mut body: Value) -> Self {
        if let Value::Object(map) = &mut body {
            map.insert("success".into(), Value::Bool(true));
        }
        Self {
            content: vec![ToolContent {
                kind: "text",
                text: Some(body.to_string()),
                data: None,
                mime_type: None,
            }],
            is_error: false,
        }
    }

    /// Success envelope carrying an image alongside the JSON body.
    pub fn success_with_image(body: Value, data_base64: String, mime_type: &str) -> Self {
        let mut result = Self::success(body);
        result.content.push(ToolContent {
            kind: "image",
            text: None,
            data: Some(data_base64),
            mime_type: Some(mime_type.to_string()),
        });
        result
    }

    pub fn failure(category: ErrorCategory, message: impl Into<String>, flags: ErrorFlags) -> Self {
        let mut error = json!({
            "category": category,
            "message": message.into(),
        });
        if let (Value::Object(target), Ok(Value::Object(flag_map))) =
            (&mut error, serde_json::to_value(flags))
        {
            for (k, v) in flag_map {
                target.insert(k, v);
            }
        }
        Self {
            content: vec![ToolContent {
                kind: "text",
                text: Some(json!({"success": false, "error": error}).to_string()),
                data: None,
                mime_type: None,
            }],
            is_error: true,
        }
    }

    /// The parsed JSON body of the first text content.
    pub fn body(&self) -> Option<Value> {
        self.content
            .iter()
            .find(|c| c.kind == "text")
            .and_then(|c| c.text.as_deref())
            .and_then(|t| serde_json::from_str(t).ok())
    }
}

pub fn invalid_args(message: impl Into<String>) -> CallToolResult {
    CallToolResult::failure(ErrorCategory::System, message, ErrorFlags::default())
}

pub fn circuit_open(operation: &str) -> CallToolResult {
    CallToolResult::failure(
        ErrorCategory::System,
        format!("operation '{operation}' temporarily unavailable (circuit open)"),
        ErrorFlags::default(),
    )
}

pub fn from_driver_error(e: &DriverError) -> CallToolResult {
    let mut flags = ErrorFlags::default();
    let category = match e {
        DriverError::Timeout { .. } => {
            flags.is_timeout = true;
            ErrorCategory::Browser
        }
        DriverError::ElementNotFound { .. } | DriverError::InvalidSelector { .. } => {
            flags.is_element_not_found = true;
            ErrorCategory::Browser
        }
        DriverError::OptionNotFound { .. } => {
            flags.is_option_not_found = true;
            ErrorCategory::Browser
        }
        DriverError::NotSelectElement { .. } => {
            flags.is_not_select_element = true;
            ErrorCategory::Browser
        }
        DriverError::NetworkError { .. } => {
            flags.is_network_error = true;
            ErrorCategory::System
        }
        DriverError::Evaluation { .. } => {
            flags.is_reference_error = e.is_reference_error();
            flags.is_syntax_error = e.is_syntax_error();
            ErrorCategory::Browser
        }
        DriverError::LaunchFailed { .. }
        | DriverError::ContextClosed
        | DriverError::Protocol { .. } => ErrorCategory::Browser,
    };
    CallToolResult::failure(category, e.to_string(), flags)
}

pub fn from_security_error(e: &SecurityError) -> CallToolResult {
    CallToolResult::failure(
        ErrorCategory::Security,
        e.to_string(),
        ErrorFlags {
            is_security_error: true,
            ..ErrorFlags::default()
        },
    )
}

pub fn from_session_error(e: &SessionError) -> CallToolResult {
    match e {
        SessionError::Driver(driver) => from_driver_error(driver),
        other => CallToolResult::failure(
            ErrorCategory::System,
            other.to_string(),
            ErrorFlags::default(),
        ),
    }
}

pub fn from_replay_error(e: &ReplayError) -> CallToolResult {
    match e {
        ReplayError::Driver(driver) => from_driver_error(driver),
        ReplayError::Security(security) => from_security_error(security),
        ReplayError::Session(session) => from_session_error(session),
        other => CallToolResult::failure(
            ErrorCategory::System,
            other.to_string(),
            ErrorFlags::default(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_carries_flag() {
        let result = CallToolResult::success(json!({"sessionId": "s1"}));
        assert!(!result.is_error);
        let body = result.body().unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["sessionId"], "s1");
    }

    #[test]
    fn timeout_maps_to_browser_category() {
        let result = from_driver_error(&DriverError::timeout("goto", 1000));
        let body = result.body().unwrap();
        assert!(result.is_error);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["category"], "browser");
        assert_eq!(body["error"]["isTimeout"], true);
        assert_eq!(body["error"]["isNetworkError"], false);
    }

    #[test]
    fn network_error_is_system_category() {
        let result = from_driver_error(&DriverError::NetworkError {
            message: "net::ERR_NAME_NOT_RESOLVED".into(),
        });
        let body = result.body().unwrap();
        assert_eq!(body["error"]["category"], "system");
        assert_eq!(body["error"]["isNetworkError"], true);
    }

    #[test]
    fn evaluation_errors_are_classified() {
        let result = from_driver_error(&DriverError::Evaluation {
            message: "Uncaught ReferenceError: x is not defined".into(),
        });
        let body = result.body().unwrap();
        assert_eq!(body["error"]["isReferenceError"], true);
        assert_eq!(body["error"]["isSyntaxError"], false);
    }

    #[test]
    fn security_errors_set_the_flag() {
        let result = from_security_error(&SecurityError::DomainDenied {
            domain: "google.com".into(),
        });
        let body = result.body().unwrap();
        assert_eq!(body["error"]["category"], "security");
        assert_eq!(body["error"]["isSecurityError"], true);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not in the allowed domains list"));
    }
}
