//! `browser.goto`: navigation with domain policy.

use super::{object_schema, opt_str, opt_u64, require_str, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::json;
use std::sync::Arc;
use webgate_driver::{GotoParams, WaitUntil};
use webgate_performance::circuit::ops;
use webgate_security::normalize_host;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.goto",
        "Navigate the session's page to a URL",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "url": {"type": "string"},
                "waitUntil": {"type": "string", "enum": ["load", "domcontentloaded", "networkidle", "commit"]},
                "timeoutMs": {"type": "integer", "minimum": 1},
            }),
            &["sessionId", "url"],
        ),
        goto,
    )
}

async fn goto(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let url = tool_try!(require_str(args, "url"));
    let wait_until = match tool_try!(opt_str(args, "waitUntil")) {
        Some(raw) => match WaitUntil::parse(&raw) {
            Some(w) => w,
            None => {
                return envelope::invalid_args(format!(
                    "argument 'waitUntil' must be one of load|domcontentloaded|networkidle|commit, got '{raw}'"
                ))
            }
        },
        None => WaitUntil::Load,
    };
    let timeout_ms = tool_try!(opt_u64(args, "timeoutMs"));

    if !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("data:") {
        return envelope::invalid_args("argument 'url' must be http(s) or a data URL");
    }

    // Domain policy applies to real origins; data URLs carry no host.
    if !url.starts_with("data:") {
        let allow = session.allowed_domains();
        if let Err(e) = state
            .security
            .require_domain_access(&url, session.id(), &allow)
            .await
        {
            return envelope::from_security_error(&e);
        }
    }

    let breaker = state.perf.circuits().breaker(ops::NAVIGATION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::NAVIGATION);
    }

    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page
        .goto(
            &url,
            GotoParams {
                wait_until,
                timeout_ms,
            },
        )
        .await
    {
        Ok(nav) => {
            breaker.record_success();
            if !url.starts_with("data:") {
                session.allow_domain(&normalize_host(&url));
            }
            session.touch();
            CallToolResult::success(json!({
                "finalUrl": nav.final_url,
                "status": nav.status,
            }))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}
