//! `browser.click`, `browser.type`, `browser.select`: DOM interaction.

use super::{object_schema, opt_bool, opt_f64, opt_u64, require_str, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::{json, Value};
use std::sync::Arc;
use webgate_driver::ClickParams;
use webgate_performance::circuit::ops;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.click",
        "Click the first element matching a selector",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "selector": {"type": "string"},
                "position": {"type": "object", "properties": {
                    "x": {"type": "number"}, "y": {"type": "number"},
                }},
                "force": {"type": "boolean"},
                "timeoutMs": {"type": "integer", "minimum": 1},
            }),
            &["sessionId", "selector"],
        ),
        click,
    )?;
    tool(
        state,
        "browser.type",
        "Clear an input and type text into it",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "selector": {"type": "string"},
                "text": {"type": "string"},
                "timeoutMs": {"type": "integer", "minimum": 1},
            }),
            &["sessionId", "selector", "text"],
        ),
        type_text,
    )?;
    tool(
        state,
        "browser.select",
        "Select an option of a <select> element by value",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "selector": {"type": "string"},
                "value": {"type": "string"},
                "timeoutMs": {"type": "integer", "minimum": 1},
            }),
            &["sessionId", "selector", "value"],
        ),
        select,
    )
}

fn parse_position(args: &Value) -> Result<Option<(f64, f64)>, CallToolResult> {
    match args.get("position") {
        None | Some(Value::Null) => Ok(None),
        Some(position) if position.is_object() => {
            let x = opt_f64(position, "x")?;
            let y = opt_f64(position, "y")?;
            match (x, y) {
                (Some(x), Some(y)) => Ok(Some((x, y))),
                _ => Err(envelope::invalid_args(
                    "argument 'position' requires numeric 'x' and 'y'",
                )),
            }
        }
        Some(_) => Err(envelope::invalid_args("argument 'position' must be an object")),
    }
}

async fn click(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let selector = tool_try!(require_str(args, "selector"));
    let position = tool_try!(parse_position(args));
    let force = tool_try!(opt_bool(args, "force")).unwrap_or(false);
    let timeout_ms = tool_try!(opt_u64(args, "timeoutMs"));

    let breaker = state.perf.circuits().breaker(ops::INTERACTION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::INTERACTION);
    }
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page
        .click(
            &selector,
            ClickParams {
                position,
                force,
                timeout_ms,
            },
        )
        .await
    {
        Ok(()) => {
            breaker.record_success();
            state.recorder.record_click(session.id(), &selector, position);
            session.touch();
            CallToolResult::success(json!({"selector": selector}))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}

async fn type_text(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let selector = tool_try!(require_str(args, "selector"));
    let text = match args.get("text") {
        Some(Value::String(text)) => text.clone(),
        Some(_) => return envelope::invalid_args("argument 'text' must be a string"),
        None => return envelope::invalid_args("missing required argument 'text'"),
    };
    let timeout_ms = tool_try!(opt_u64(args, "timeoutMs"));

    let breaker = state.perf.circuits().breaker(ops::INTERACTION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::INTERACTION);
    }
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page.fill(&selector, &text, timeout_ms).await {
        Ok(()) => {
            breaker.record_success();
            state.recorder.record_type(session.id(), &selector, &text);
            session.touch();
            CallToolResult::success(json!({"selector": selector, "typed": text.len()}))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}

async fn select(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let selector = tool_try!(require_str(args, "selector"));
    let value = tool_try!(require_str(args, "value"));
    let timeout_ms = tool_try!(opt_u64(args, "timeoutMs"));

    let breaker = state.perf.circuits().breaker(ops::INTERACTION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::INTERACTION);
    }
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page.select_option(&selector, &value, timeout_ms).await {
        Ok(()) => {
            breaker.record_success();
            state.recorder.record_select(session.id(), &selector, &value);
            session.touch();
            CallToolResult::success(json!({"selector": selector, "value": value}))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}
