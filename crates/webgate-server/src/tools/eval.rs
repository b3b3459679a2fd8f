//! `browser.eval`: script evaluation through the policy filter and the
//! throttled execution queue.

use super::{object_schema, require_str, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::json;
use std::sync::Arc;
use webgate_performance::circuit::ops;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.eval",
        "Evaluate JavaScript in the page and return the serialisable result",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "code": {"type": "string"},
            }),
            &["sessionId", "code"],
        ),
        eval,
    )
}

async fn eval(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let code = tool_try!(require_str(args, "code"));

    if let Err(e) = state.security.check_script(&code) {
        return envelope::from_security_error(&e);
    }

    let breaker = state.perf.circuits().breaker(ops::EVALUATION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::EVALUATION);
    }

    // Evaluate-class operations go through the CPU throttle queue.
    let _permit = state.perf.acquire_heavy_op().await;
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page.evaluate(&code).await {
        Ok(value) => {
            breaker.record_success();
            state.recorder.record_eval(session.id(), &code);
            session.touch();
            CallToolResult::success(json!({"result": value}))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}
