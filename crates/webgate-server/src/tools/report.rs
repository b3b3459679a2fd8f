//! `browser.report.*`: composite reports from the captured pipeline data.

use super::{logs_redact, object_schema, opt_str, opt_u64, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use webgate_performance::circuit::ops;

const TEMPLATES: &[(&str, &str)] = &[
    ("summary", "Final URL, console errors and failed requests"),
    ("full", "Everything captured: network, console, DOM snapshot"),
    ("network", "Network records and HAR-style timing only"),
];

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.report.generate",
        "Write a composite JSON or HTML report for a session",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "title": {"type": "string"},
                "template": {"type": "string", "enum": ["summary", "full", "network"]},
                "format": {"type": "string", "enum": ["json", "html"]},
            }),
            &["sessionId"],
        ),
        generate,
    )?;
    tool(
        state,
        "browser.report.templates",
        "List the built-in report templates",
        object_schema(json!({}), &[]),
        templates,
    )?;
    tool(
        state,
        "browser.report.cleanup",
        "Delete generated reports older than a given age",
        object_schema(
            json!({"olderThanMs": {"type": "integer", "minimum": 0}}),
            &[],
        ),
        cleanup,
    )
}

async fn generate(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let title = tool_try!(opt_str(args, "title"))
        .unwrap_or_else(|| format!("Session report {}", session.id()));
    let template = tool_try!(opt_str(args, "template")).unwrap_or_else(|| "full".to_string());
    if !TEMPLATES.iter().any(|(name, _)| *name == template) {
        return envelope::invalid_args(format!("unknown template '{template}'"));
    }
    let format = tool_try!(opt_str(args, "format")).unwrap_or_else(|| "json".to_string());
    if format != "json" && format != "html" {
        return envelope::invalid_args("argument 'format' must be json or html");
    }

    let breaker = state.perf.circuits().breaker(ops::FILE_OP);
    if !breaker.allow() {
        return envelope::circuit_open(ops::FILE_OP);
    }

    let redactor = state.security.redactor();
    let network: Vec<_> = session
        .network_logs(usize::MAX)
        .into_iter()
        .map(|r| logs_redact(redactor, r))
        .collect();
    let console = session.console_logs(usize::MAX);
    let final_url = match session.page() {
        Ok(page) => page.url().await.unwrap_or_default(),
        Err(_) => String::new(),
    };

    let body = match template.as_str() {
        "summary" => json!({
            "title": title,
            "generatedAt": Utc::now(),
            "sessionId": session.id(),
            "finalUrl": final_url,
            "consoleErrors": console.iter().filter(|c| c.level.as_str() == "error").collect::<Vec<_>>(),
            "failedRequests": network.iter().filter(|n| n.status == 0 || n.status >= 400).collect::<Vec<_>>(),
        }),
        "network" => json!({
            "title": title,
            "generatedAt": Utc::now(),
            "sessionId": session.id(),
            "network": network,
        }),
        _ => json!({
            "title": title,
            "generatedAt": Utc::now(),
            "sessionId": session.id(),
            "finalUrl": final_url,
            "network": network,
            "console": console,
        }),
    };

    let dir = state.config.report_dir();
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        breaker.record_failure();
        return envelope::invalid_args(format!("cannot create report directory: {e}"));
    }
    let filename = format!(
        "report-{}-{}.{format}",
        session.id(),
        Utc::now().timestamp_millis()
    );
    let path = dir.join(filename);
    let rendered = if format == "html" {
        render_html(&title, &body)
    } else {
        serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
    };

    match tokio::fs::write(&path, rendered).await {
        Ok(()) => {
            breaker.record_success();
            session.touch();
            CallToolResult::success(json!({
                "path": path.to_string_lossy(),
                "format": format,
                "template": template,
            }))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::invalid_args(format!("failed to write report: {e}"))
        }
    }
}

async fn templates(_state: Arc<AppState>, _invocation: ToolInvocation) -> CallToolResult {
    let templates: Vec<Value> = TEMPLATES
        .iter()
        .map(|(name, description)| json!({"name": name, "description": description}))
        .collect();
    CallToolResult::success(json!({"templates": templates}))
}

async fn cleanup(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let older_than_ms = tool_try!(opt_u64(args, "olderThanMs")).unwrap_or(0);
    let cutoff = std::time::Duration::from_millis(older_than_ms);
    let dir = state.config.report_dir();

    let mut removed = 0usize;
    match tokio::fs::read_dir(&dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let expired = entry
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.elapsed().ok())
                    .map(|age| age >= cutoff)
                    .unwrap_or(false);
                if expired && tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return envelope::invalid_args(format!("cannot list reports: {e}")),
    }
    CallToolResult::success(json!({"removed": removed}))
}

fn render_html(title: &str, body: &Value) -> String {
    let escaped_title = title
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let data = serde_json::to_string_pretty(body)
        .unwrap_or_default()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <title>{escaped_title}</title></head>\
         <body><h1>{escaped_title}</h1><pre>{data}</pre></body></html>\n"
    )
}
