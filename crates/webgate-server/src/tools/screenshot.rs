//! `browser.screenshot`: page, element and region capture.

use super::{object_schema, opt_bool, opt_f64, opt_str, opt_u64, session_from, tool, tool_try};
use crate::envelope::{self, CallToolResult};
use crate::gateway::AppState;
use crate::registry::ToolInvocation;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use webgate_driver::{ScreenshotClip, ScreenshotFormat, ScreenshotParams};
use webgate_performance::circuit::ops;

pub fn register(state: &Arc<AppState>) -> Result<(), String> {
    tool(
        state,
        "browser.screenshot",
        "Capture the page, an element, or a region as PNG/JPEG",
        object_schema(
            json!({
                "sessionId": {"type": "string"},
                "format": {"type": "string", "enum": ["png", "jpeg"]},
                "fullPage": {"type": "boolean"},
                "selector": {"type": "string"},
                "clip": {"type": "object", "properties": {
                    "x": {"type": "number"}, "y": {"type": "number"},
                    "width": {"type": "number"}, "height": {"type": "number"},
                }},
                "omitBackground": {"type": "boolean"},
                "quality": {"type": "integer", "minimum": 0, "maximum": 100},
                "timeoutMs": {"type": "integer", "minimum": 1},
            }),
            &["sessionId"],
        ),
        screenshot,
    )
}

fn parse_clip(args: &Value) -> Result<Option<ScreenshotClip>, CallToolResult> {
    match args.get("clip") {
        None | Some(Value::Null) => Ok(None),
        Some(clip) if clip.is_object() => {
            let fields = [
                opt_f64(clip, "x")?,
                opt_f64(clip, "y")?,
                opt_f64(clip, "width")?,
                opt_f64(clip, "height")?,
            ];
            match fields {
                [Some(x), Some(y), Some(width), Some(height)] if width > 0.0 && height > 0.0 => {
                    Ok(Some(ScreenshotClip {
                        x,
                        y,
                        width,
                        height,
                    }))
                }
                _ => Err(envelope::invalid_args(
                    "argument 'clip' requires positive numeric x, y, width, height",
                )),
            }
        }
        Some(_) => Err(envelope::invalid_args("argument 'clip' must be an object")),
    }
}

async fn screenshot(state: Arc<AppState>, invocation: ToolInvocation) -> CallToolResult {
    let args = &invocation.arguments;
    let session = tool_try!(session_from(&state, args));
    let format = match tool_try!(opt_str(args, "format")) {
        Some(raw) => match ScreenshotFormat::parse(&raw) {
            Some(f) => f,
            None => {
                return envelope::invalid_args(format!(
                    "argument 'format' must be png or jpeg, got '{raw}'"
                ))
            }
        },
        None => ScreenshotFormat::Png,
    };
    let full_page = tool_try!(opt_bool(args, "fullPage")).unwrap_or(false);
    let omit_background = tool_try!(opt_bool(args, "omitBackground")).unwrap_or(false);
    let quality = tool_try!(opt_u64(args, "quality"));
    if let Some(q) = quality {
        if q > 100 {
            return envelope::invalid_args("argument 'quality' must be within 0..=100");
        }
        if format == ScreenshotFormat::Png {
            return envelope::invalid_args("argument 'quality' only applies to jpeg");
        }
    }
    let selector = tool_try!(opt_str(args, "selector"));
    let mut clip = tool_try!(parse_clip(args));
    let timeout_ms = tool_try!(opt_u64(args, "timeoutMs"));

    let breaker = state.perf.circuits().breaker(ops::SCREENSHOT);
    if !breaker.allow() {
        return envelope::circuit_open(ops::SCREENSHOT);
    }
    let page = tool_try!(session.page().map_err(|e| envelope::from_session_error(&e)));

    // Element shots report the rounded bounding box; page shots report the
    // viewport even for fullPage captures.
    let (width, height) = if let Some(selector) = &selector {
        match page.bounding_box(selector).await {
            Ok((x, y, w, h)) => {
                clip = Some(ScreenshotClip {
                    x,
                    y,
                    width: w,
                    height: h,
                });
                (w.round() as u32, h.round() as u32)
            }
            Err(e) => {
                breaker.record_failure();
                return envelope::from_driver_error(&e);
            }
        }
    } else {
        let viewport = session.options().viewport;
        (viewport.width, viewport.height)
    };

    let params = ScreenshotParams {
        format,
        full_page: full_page && selector.is_none(),
        clip,
        omit_background,
        quality: quality.map(|q| q as i64),
        timeout_ms,
    };
    match page.screenshot(params).await {
        Ok(bytes) => {
            breaker.record_success();
            session.touch();
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            CallToolResult::success_with_image(
                json!({
                    "format": format,
                    "width": width,
                    "height": height,
                    "bytes": bytes.len(),
                    "data": encoded.clone(),
                }),
                encoded,
                format.mime_type(),
            )
        }
        Err(e) => {
            breaker.record_failure();
            envelope::from_driver_error(&e)
        }
    }
}
