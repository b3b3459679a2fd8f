//! `browser.newContext`: session creation.

use super::{object_schema, opt_bool, opt_str, opt_str_array, opt_u64, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::{json, Value};
use std::sync::Arc;
use webgate_performance::circuit::ops;
use webgate_driver::Viewport;
use webgate_session::SessionOptions;

const MAX_VIEWPORT_DIM: u64 = 10_000;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.newContext",
        "Create an isolated browser context and return its session id",
        object_schema(
            json!({
                "viewport": {"type": "object", "properties": {
                    "width": {"type": "integer", "minimum": 1},
                    "height": {"type": "integer", "minimum": 1},
                }},
                "userAgent": {"type": "string"},
                "allowedDomains": {"type": "array", "items": {"type": "string"}},
                "ignoreTlsErrors": {"type": "boolean"},
                "bypassCsp": {"type": "boolean"},
                "defaultTimeoutMs": {"type": "integer", "minimum": 1},
                "clientId": {"type": "string"},
            }),
            &[],
        ),
        new_context,
    )
}

fn parse_viewport(args: &Value, default: Viewport) -> Result<Viewport, CallToolResult> {
    let Some(viewport) = args.get("viewport") else {
        return Ok(default);
    };
    if !viewport.is_object() {
        return Err(envelope::invalid_args("argument 'viewport' must be an object"));
    }
    let width = opt_u64(viewport, "width")?.unwrap_or(default.width as u64);
    let height = opt_u64(viewport, "height")?.unwrap_or(default.height as u64);
    if width == 0 || height == 0 || width > MAX_VIEWPORT_DIM || height > MAX_VIEWPORT_DIM {
        return Err(envelope::invalid_args(format!(
            "viewport dimensions must be within 1..={MAX_VIEWPORT_DIM}"
        )));
    }
    Ok(Viewport {
        width: width as u32,
        height: height as u32,
    })
}

async fn new_context(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let viewport = tool_try!(parse_viewport(args, state.config.default_viewport()));
    let user_agent = tool_try!(opt_str(args, "userAgent"));
    let allowed_domains = tool_try!(opt_str_array(args, "allowedDomains")).unwrap_or_default();
    let ignore_tls_errors = tool_try!(opt_bool(args, "ignoreTlsErrors")).unwrap_or(false);
    let bypass_csp = tool_try!(opt_bool(args, "bypassCsp")).unwrap_or(false);
    let default_timeout_ms = tool_try!(opt_u64(args, "defaultTimeoutMs")).unwrap_or(30_000);
    let client_id = tool_try!(opt_str(args, "clientId"))
        .unwrap_or_else(|| invocation.client_id.clone());

    let options = SessionOptions {
        viewport,
        user_agent,
        default_timeout_ms,
        client_id: Some(client_id.clone()),
        allowed_domains,
        ignore_tls_errors,
        bypass_csp,
    };

    let breaker = state.perf.circuits().breaker(ops::SESSION_CREATE);
    if !breaker.allow() {
        return envelope::circuit_open(ops::SESSION_CREATE);
    }
    match state.sessions.create_session(options, Some(client_id)).await {
        Ok(session) => {
            breaker.record_success();
            CallToolResult::success(json!({
                "sessionId": session.id(),
                "viewport": {
                    "width": session.options().viewport.width,
                    "height": session.options().viewport.height,
                },
                "userAgent": session.options().user_agent,
                "createdAt": session.created_at(),
            }))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_session_error(&e)
        }
    }
}
