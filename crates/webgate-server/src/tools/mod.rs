//! The canonical tool set.
//!
//! Every handler validates its argument map structurally before touching
//! session state, and returns the uniform envelope from [`crate::envelope`].

use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::{ToolDescriptor, ToolFuture, ToolInvocation};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use webgate_session::Session;

mod context;
mod eval;
mod input;
mod logs;
mod macros;
mod navigation;
mod report;
mod screenshot;
mod snapshot;
mod trace;

pub(crate) use logs::redact_record as logs_redact;

pub fn register_all(state: &Arc<AppState>) -> Result<(), String> {
    context::register(state)?;
    navigation::register(state)?;
    input::register(state)?;
    eval::register(state)?;
    screenshot::register(state)?;
    snapshot::register(state)?;
    logs::register(state)?;
    trace::register(state)?;
    macros::register(state)?;
    report::register(state)?;
    Ok(())
}

/// Registration boilerplate: captures the state in the handler closure.
pub(crate) fn tool<F, Fut>(
    state: &Arc<AppState>,
    name: &str,
    description: &str,
    input_schema: Value,
    handler: F,
) -> Result<(), String>
where
    F: Fn(Arc<AppState>, ToolInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallToolResult> + Send + 'static,
{
    let captured = state.clone();
    state.registry.register(
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        },
        Arc::new(move |invocation| {
            let state = captured.clone();
            Box::pin(handler(state, invocation)) as ToolFuture
        }),
    )
}

/// Early-return on argument/lookup failures inside tool handlers.
macro_rules! tool_try {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(result) => return result,
        }
    };
}
pub(crate) use tool_try;

pub(crate) fn require_str(args: &Value, key: &str) -> Result<String, CallToolResult> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(envelope::invalid_args(format!(
            "argument '{key}' must not be empty"
        ))),
        Some(_) => Err(envelope::invalid_args(format!(
            "argument '{key}' must be a string"
        ))),
        None => Err(envelope::invalid_args(format!(
            "missing required argument '{key}'"
        ))),
    }
}

pub(crate) fn opt_str(args: &Value, key: &str) -> Result<Option<String>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(envelope::invalid_args(format!(
            "argument '{key}' must be a string"
        ))),
    }
}

pub(crate) fn opt_u64(args: &Value, key: &str) -> Result<Option<u64>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            envelope::invalid_args(format!(
                "argument '{key}' must be a non-negative integer"
            ))
        }),
    }
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Result<Option<bool>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(envelope::invalid_args(format!(
            "argument '{key}' must be a boolean"
        ))),
    }
}

pub(crate) fn opt_f64(args: &Value, key: &str) -> Result<Option<f64>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            envelope::invalid_args(format!("argument '{key}' must be a number"))
        }),
    }
}

pub(crate) fn opt_str_array(args: &Value, key: &str) -> Result<Option<Vec<String>>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => {
                        return Err(envelope::invalid_args(format!(
                            "argument '{key}' must be an array of strings"
                        )))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(envelope::invalid_args(format!(
            "argument '{key}' must be an array of strings"
        ))),
    }
}

/// Resolve the live session named by `sessionId`.
pub(crate) fn session_from(
    state: &AppState,
    args: &Value,
) -> Result<Arc<Session>, CallToolResult> {
    let id = require_str(args, "sessionId")?;
    state.sessions.get_session(&id).ok_or_else(|| {
        envelope::invalid_args(format!("session '{id}' not found"))
    })
}

/// Shorthand JSON-schema for an object with the given property map.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
