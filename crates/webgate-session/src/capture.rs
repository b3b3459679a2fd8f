//! Per-session event capture: page events in, bounded log buffers out.

use crate::records::{ConsoleRecord, NetworkRecord};
use crate::session::Session;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use webgate_driver::{ConsoleLevel, PageEvent, MAX_CAPTURED_BODY_BYTES};

/// Console record fanned out to socket subscribers.
#[derive(Debug, Clone)]
pub struct ConsoleBroadcast {
    pub session_id: String,
    pub record: ConsoleRecord,
}

struct PendingRequest {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<String>,
    started: Instant,
}

/// Consume a page's event stream into the session's ring buffers until the
/// stream closes or the session is destroyed.
///
/// Request/response pairing is keyed by request id; a failure without a
/// response produces a record with status 0. Console records are mirrored
/// onto `console_tx` for transport-level notification fan-out.
pub fn spawn_capture(
    session: Arc<Session>,
    mut events: broadcast::Receiver<PageEvent>,
    console_tx: broadcast::Sender<ConsoleBroadcast>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: HashMap<String, PendingRequest> = HashMap::new();

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(session_id = %session.id(), missed, "capture lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if session.is_destroyed() {
                break;
            }

            match event {
                PageEvent::Request {
                    request_id,
                    method,
                    url,
                    headers,
                    body,
                } => {
                    pending.insert(
                        request_id,
                        PendingRequest {
                            method,
                            url,
                            headers,
                            body,
                            started: Instant::now(),
                        },
                    );
                }
                PageEvent::Response {
                    request_id,
                    status,
                    headers,
                    body,
                } => {
                    if let Some(request) = pending.remove(&request_id) {
                        let response_body =
                            body.filter(|b| b.len() <= MAX_CAPTURED_BODY_BYTES);
                        session.push_network(NetworkRecord {
                            timestamp: Utc::now(),
                            method: request.method,
                            url: request.url,
                            status,
                            request_headers: request.headers,
                            response_headers: headers,
                            request_body: request.body,
                            response_body,
                            duration_ms: request.started.elapsed().as_millis() as u64,
                        });
                    }
                }
                PageEvent::RequestFailed { request_id, error } => {
                    if let Some(request) = pending.remove(&request_id) {
                        debug!(
                            session_id = %session.id(),
                            url = %request.url,
                            error = %error,
                            "request failed"
                        );
                        session.push_network(NetworkRecord {
                            timestamp: Utc::now(),
                            method: request.method,
                            url: request.url,
                            status: 0,
                            request_headers: request.headers,
                            response_headers: HashMap::new(),
                            request_body: request.body,
                            response_body: None,
                            duration_ms: request.started.elapsed().as_millis() as u64,
                        });
                    }
                }
                PageEvent::Console {
                    level,
                    text,
                    location,
                } => {
                    let record = ConsoleRecord {
                        timestamp: Utc::now(),
                        level,
                        message: text,
                        location,
                    };
                    session.push_console(record.clone());
                    let _ = console_tx.send(ConsoleBroadcast {
                        session_id: session.id().to_string(),
                        record,
                    });
                }
                PageEvent::PageError { message } => {
                    let record = ConsoleRecord {
                        timestamp: Utc::now(),
                        level: ConsoleLevel::Error,
                        message,
                        location: None,
                    };
                    session.push_console(record.clone());
                    let _ = console_tx.send(ConsoleBroadcast {
                        session_id: session.id().to_string(),
                        record,
                    });
                }
                PageEvent::FrameNavigated { .. } => {
                    // Navigation is the macro recorder's concern.
                }
            }
        }
        debug!(session_id = %session.id(), "capture task ended");
    })
}
