//! `browser.trace.start` / `browser.trace.stop`.

use super::{object_schema, opt_bool, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use webgate_driver::TraceOptions;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.trace.start",
        "Start a context trace for the session",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "screenshots": {"type": "boolean"},
                "snapshots": {"type": "boolean"},
                "sources": {"type": "boolean"},
            }),
            &["sessionId"],
        ),
        trace_start,
    )?;
    tool(
        state,
        "browser.trace.stop",
        "Stop the session's trace and write the artifact",
        object_schema(json!({"sessionId": {"type": "string"}}), &["sessionId"]),
        trace_stop,
    )
}

async fn trace_start(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let options = TraceOptions {
        screenshots: tool_try!(opt_bool(args, "screenshots")).unwrap_or(false),
        snapshots: tool_try!(opt_bool(args, "snapshots")).unwrap_or(false),
        sources: tool_try!(opt_bool(args, "sources")).unwrap_or(false),
    };

    let dir = state.config.trace_dir();
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        return envelope::invalid_args(format!("cannot create trace directory: {e}"));
    }
    let path = dir.join(format!(
        "trace-{}-{}.json",
        session.id(),
        Utc::now().timestamp_millis()
    ));

    match session
        .start_tracing(options, path.to_string_lossy().into_owned())
        .await
    {
        Ok(record) => {
            session.touch();
            CallToolResult::success(json!({
                "sessionId": record.session_id,
                "startedAt": record.started_at,
                "outputPath": record.output_path,
                "options": record.options,
            }))
        }
        Err(e) => envelope::from_session_error(&e),
    }
}

async fn trace_stop(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    match session.stop_tracing().await {
        Ok(record) => {
            session.touch();
            CallToolResult::success(json!({
                "sessionId": record.session_id,
                "startedAt": record.started_at,
                "endedAt": record.ended_at,
                "outputPath": record.output_path,
            }))
        }
        Err(e) => envelope::from_session_error(&e),
    }
}
