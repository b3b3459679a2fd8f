//! Request dispatch shared by both transports.

use crate::envelope;
use crate::gateway::AppState;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::registry::ToolInvocation;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Handle one parsed request. `None` for notifications (nothing to send
/// back). The dispatcher never propagates an exception: every failure is a
/// structured tool result or a typed JSON-RPC error.
pub async fn dispatch(
    state: &Arc<AppState>,
    request: JsonRpcRequest,
    client_id: &str,
) -> Option<JsonRpcResponse> {
    let id = match request.id {
        Some(id) => id,
        None => {
            debug!(method = %request.method, "ignoring client notification");
            return None;
        }
    };

    let response = match request.method.as_str() {
        "tools.list" => {
            JsonRpcResponse::success(id, json!({"tools": state.registry.list()}))
        }
        "server.info" => JsonRpcResponse::success(id, state.server_info()),
        "tools.call" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let name = match params.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_REQUEST,
                        "tools.call requires a 'name' parameter",
                    ))
                }
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            call_tool(state, id, &name, arguments, client_id).await
        }
        method if state.registry.contains(method) => {
            let arguments = request.params.unwrap_or_else(|| json!({}));
            let method = method.to_string();
            call_tool(state, id, &method, arguments, client_id).await
        }
        method => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        ),
    };
    Some(response)
}

async fn call_tool(
    state: &Arc<AppState>,
    id: Value,
    name: &str,
    arguments: Value,
    client_id: &str,
) -> JsonRpcResponse {
    // Per-(client, operation) limits apply before the handler runs; a
    // rejection is a structured result, not a protocol error.
    if let Err(e) = state.security.check_rate(client_id, name) {
        let result = envelope::from_security_error(&e);
        return tool_response(id, result);
    }

    let invocation = ToolInvocation {
        client_id: client_id.to_string(),
        arguments,
    };
    match state.registry.call(name, invocation).await {
        Some(result) => tool_response(id, result),
        None => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {name}")),
    }
}

fn tool_response(id: Value, result: envelope::CallToolResult) -> JsonRpcResponse {
    match serde_json::to_value(&result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {e}")),
    }
}
