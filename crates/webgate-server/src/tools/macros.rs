//! `browser.macro.*`: recording and playback.

use super::{object_schema, opt_bool, opt_str, opt_u64, require_str, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::json;
use std::sync::Arc;
use webgate_replay::PlaybackOptions;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.macro.startRecording",
        "Start recording interactions on a session",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "name": {"type": "string"},
                "description": {"type": "string"},
            }),
            &["sessionId", "name"],
        ),
        start_recording,
    )?;
    tool(
        state,
        "browser.macro.stopRecording",
        "Stop the session's recording and persist the macro",
        object_schema(json!({"sessionId": {"type": "string"}}), &["sessionId"]),
        stop_recording,
    )?;
    tool(
        state,
        "browser.macro.list",
        "List stored macros",
        object_schema(json!({}), &[]),
        list_macros,
    )?;
    tool(
        state,
        "browser.macro.play",
        "Replay a stored macro against a session",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "macroId": {"type": "string"},
                "startFromStep": {"type": "integer", "minimum": 0},
                "endAtStep": {"type": "integer", "minimum": 0},
                "delayBetweenActionsMs": {"type": "integer", "minimum": 0},
                "stepByStep": {"type": "boolean"},
                "continueOnError": {"type": "boolean"},
            }),
            &["sessionId", "macroId"],
        ),
        play_macro,
    )?;
    tool(
        state,
        "browser.macro.delete",
        "Delete a stored macro",
        object_schema(json!({"macroId": {"type": "string"}}), &["macroId"]),
        delete_macro,
    )
}

async fn start_recording(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let name = tool_try!(require_str(args, "name"));
    let description = tool_try!(opt_str(args, "description"));

    match state.recorder.start(&session, &name, description) {
        Ok(macro_id) => {
            session.touch();
            CallToolResult::success(json!({"macroId": macro_id, "name": name}))
        }
        Err(e) => envelope::from_replay_error(&e),
    }
}

async fn stop_recording(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    match state.recorder.stop(session.id()).await {
        Ok(recording) => {
            session.touch();
            CallToolResult::success(json!({
                "macroId": recording.id,
                "name": recording.name,
                "totalActions": recording.actions.len(),
                "startedAt": recording.started_at,
                "endedAt": recording.ended_at,
            }))
        }
        Err(e) => envelope::from_replay_error(&e),
    }
}

async fn list_macros(state: Arc<AppState>, _invocation: ToolInvocation) -> CallToolResult {
    match state.storage.list().await {
        Ok(macros) => {
            let count = macros.len();
            CallToolResult::success(json!({"macros": macros, "count": count}))
        }
        Err(e) => envelope::from_replay_error(&e),
    }
}

async fn play_macro(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let macro_id = tool_try!(require_str(args, "macroId"));
    let options = PlaybackOptions {
        start_from_step: tool_try!(opt_u64(args, "startFromStep")).unwrap_or(0) as usize,
        end_at_step: tool_try!(opt_u64(args, "endAtStep")).map(|v| v as usize),
        delay_between_actions_ms: tool_try!(opt_u64(args, "delayBetweenActionsMs")).unwrap_or(0),
        step_by_step: tool_try!(opt_bool(args, "stepByStep")).unwrap_or(false),
        continue_on_error: tool_try!(opt_bool(args, "continueOnError")).unwrap_or(false),
    };

    match state.player.play(session.clone(), &macro_id, options).await {
        Ok(result) => {
            session.touch();
            match serde_json::to_value(&result) {
                Ok(value) => CallToolResult::success(value),
                Err(e) => envelope::invalid_args(format!("failed to serialise result: {e}")),
            }
        }
        Err(e) => envelope::from_replay_error(&e),
    }
}

async fn delete_macro(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let macro_id = tool_try!(require_str(args, "macroId"));
    match state.storage.delete(&macro_id).await {
        Ok(deleted) => CallToolResult::success(json!({"macroId": macro_id, "deleted": deleted})),
        Err(e) => envelope::from_replay_error(&e),
    }
}
