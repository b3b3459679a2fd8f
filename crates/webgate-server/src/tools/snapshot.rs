//! `browser.domSnapshot`: bounded depth-first DOM walk.

use super::{object_schema, opt_u64, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use serde_json::json;
use std::sync::Arc;
use webgate_performance::circuit::ops;

const DEFAULT_MAX_NODES: u64 = 5_000;
const MAX_MAX_NODES: u64 = 50_000;

/// Depth-first walker with a single node counter: the walk stops the moment
/// the counter reaches the cap and a `{__truncated: true}` marker takes the
/// place of the next node.
fn walker_script(max_nodes: u64) -> String {
    format!(
        r#"(() => {{
            const max = {max_nodes};
            let count = 0;
            let truncated = false;
            const walk = (node) => {{
                if (truncated) return null;
                if (count >= max) {{ truncated = true; return {{__truncated: true}}; }}
                count++;
                const out = {{ nodeName: node.nodeName.toLowerCase() }};
                if (node.nodeType === Node.TEXT_NODE) {{
                    const text = node.textContent.trim();
                    if (!text) {{ count--; return null; }}
                    out.text = text.slice(0, 200);
                    return out;
                }}
                if (node.attributes && node.attributes.length) {{
                    const attrs = {{}};
                    for (const a of node.attributes) attrs[a.name] = a.value;
                    out.attributes = attrs;
                }}
                const children = [];
                for (const child of node.childNodes) {{
                    const rendered = walk(child);
                    if (rendered) children.push(rendered);
                    if (truncated) break;
                }}
                if (children.length) out.children = children;
                return out;
            }};
            const root = walk(document.documentElement);
            return {{ root, totalNodes: count, maxNodes: max, truncated }};
        }})()"#
    )
}

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.domSnapshot",
        "Serialise the DOM tree, truncated at a node budget",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "maxNodes": {"type": "integer", "minimum": 1, "maximum": MAX_MAX_NODES},
            }),
            &["sessionId"],
        ),
        dom_snapshot,
    )
}

async fn dom_snapshot(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let max_nodes = tool_try!(opt_u64(args, "maxNodes")).unwrap_or(DEFAULT_MAX_NODES);
    if max_nodes == 0 || max_nodes > MAX_MAX_NODES {
        return envelope::invalid_args(format!(
            "argument 'maxNodes' must be within 1..={MAX_MAX_NODES}"
        ));
    }

    let breaker = state.perf.circuits().breaker(ops::EVALUATION);
    if !breaker.allow() {
        return envelope::circuit_open(ops::EVALUATION);
    }
    let _permit = state.perf.acquire_heavy_op().await;
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));
    match page.evaluate(&walker_script(max_nodes)).await {
        Ok(snapshot) => {
            breaker.record_success();
            session.touch();
            CallToolResult::success(json!({"snapshot": snapshot}))
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walker_embeds_the_cap() {
        let script = walker_script(123);
        assert!(script.contains("const max = 123;"));
        assert!(script.contains("__truncated"));
    }
}
