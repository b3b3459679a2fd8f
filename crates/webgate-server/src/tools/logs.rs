//! `browser.network.getRecent`, `browser.console.getRecent`,
//! `browser.harExport`: captured pipeline data, redacted on the way out.

use super::{object_schema, opt_str, opt_u64, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::{json, Value};
use std::sync::Arc;
use webgate_security::Redactor;
use webgate_session::NetworkRecord;

const DEFAULT_LIMIT: u64 = 100;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.network.getRecent",
        "Recent network records for a session, sensitive data redacted",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 1000},
            }),
            &["sessionId"],
        ),
        network_recent,
    )?;
    tool(
        state,
        "browser.console.getRecent",
        "Recent console records for a session",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 1000},
                "level": {"type": "string", "enum": ["log", "info", "warn", "error", "debug"]},
            }),
            &["sessionId"],
        ),
        console_recent,
    )?;
    tool(
        state,
        "browser.harExport",
        "Export the session's network records as a HAR 1.2 document",
        object_schema(json!({"sessionId": {"type": "string"}}), &["sessionId"]),
        har_export,
    )
}

/// Apply the full redaction pass to one captured record.
pub(crate) fn redact_record(redactor: &Redactor, mut record: NetworkRecord) -> NetworkRecord {
    redactor.redact_headers(&mut record.request_headers);
    redactor.redact_headers(&mut record.response_headers);
    record.request_body = record.request_body.map(|b| redactor.redact_body(&b));
    record.response_body = record.response_body.map(|b| redactor.redact_body(&b));
    record
}

async fn network_recent(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let limit = tool_try!(opt_u64(args, "limit")).unwrap_or(DEFAULT_LIMIT) as usize;

    let redactor = state.security.redactor();
    let records: Vec<NetworkRecord> = session
        .network_logs(limit)
        .into_iter()
        .map(|r| redact_record(redactor, r))
        .collect();
    let count = records.len();
    session.touch();
    CallToolResult::success(json!({
        "records": records,
        "count": count,
    }))
}

async fn console_recent(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let limit = tool_try!(opt_u64(args, "limit")).unwrap_or(DEFAULT_LIMIT) as usize;
    let level = tool_try!(opt_str(args, "level"));

    let mut records = session.console_logs(limit);
    if let Some(level) = level {
        records.retain(|r| r.level.as_str() == level);
    }
    let count = records.len();
    session.touch();
    CallToolResult::success(json!({
        "records": records,
        "count": count,
    }))
}

async fn har_export(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));

    let redactor = state.security.redactor();
    let entries: Vec<Value> = session
        .network_logs(usize::MAX)
        .into_iter()
        .map(|r| har_entry(&redact_record(redactor, r)))
        .collect();
    session.touch();
    CallToolResult::success(json!({
        "har": {
            "log": {
                "version": "1.2",
                "creator": {"name": "webgate", "version": env!("CARGO_PKG_VERSION")},
                "entries": entries,
            }
        }
    }))
}

fn header_list(headers: &std::collections::HashMap<String, String>) -> Vec<Value> {
    let mut list: Vec<Value> = headers
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    list.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    list
}

fn har_entry(record: &NetworkRecord) -> Value {
    json!({
        "startedDateTime": record.timestamp.to_rfc3339(),
        "time": record.duration_ms,
        "request": {
            "method": record.method,
            "url": record.url,
            "httpVersion": "HTTP/1.1",
            "headers": header_list(&record.request_headers),
            "queryString": [],
            "cookies": [],
            "headersSize": -1,
            "bodySize": record.request_body.as_ref().map(|b| b.len() as i64).unwrap_or(-1),
            "postData": record.request_body.as_ref().map(|body| json!({
                "mimeType": record.request_headers.get("content-type").cloned().unwrap_or_default(),
                "text": body,
            })),
        },
        "response": {
            "status": record.status,
            "statusText": "",
            "httpVersion": "HTTP/1.1",
            "headers": header_list(&record.response_headers),
            "cookies": [],
            "content": {
                "size": record.response_body.as_ref().map(|b| b.len() as i64).unwrap_or(0),
                "mimeType": record.response_headers.get("content-type").cloned().unwrap_or_default(),
                "text": record.response_body,
            },
            "redirectURL": "",
            "headersSize": -1,
            "bodySize": -1,
        },
        "cache": {},
        "timings": {"send": 0, "wait": record.duration_ms, "receive": 0},
    })
}
