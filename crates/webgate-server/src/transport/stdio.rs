//! Line-delimited JSON-RPC over the process's standard streams.
//!
//! One message per line in both directions; notifications share stdout with
//! responses behind a lock so frames never interleave.

use crate::dispatch::dispatch;
use crate::gateway::AppState;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// All stdio callers share one client identity.
const STDIO_CLIENT: &str = "stdio";

pub async fn run(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    info!("stdio transport started");

    let notification_task = {
        let stdout = stdout.clone();
        let mut notifications = state.notifications.subscribe();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        if let Ok(json) = serde_json::to_string(&notification) {
                            write_line(&stdout, &json).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("stdio transport shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                        Ok(request) => {
                            debug!(method = %request.method, "stdio request");
                            dispatch(&state, request, STDIO_CLIENT).await
                        }
                        Err(e) => {
                            warn!(error = %e, "unparseable stdio frame");
                            Some(JsonRpcResponse::parse_error())
                        }
                    };
                    if let Some(response) = response {
                        if let Ok(json) = serde_json::to_string(&response) {
                            write_line(&stdout, &json).await;
                        }
                    }
                }
                Ok(None) => {
                    info!("stdin closed, stdio transport exiting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read error");
                    break;
                }
            }
        }
    }

    notification_task.abort();
}

async fn write_line(stdout: &Arc<Mutex<tokio::io::Stdout>>, line: &str) {
    let mut out = stdout.lock().await;
    if out.write_all(line.as_bytes()).await.is_err() {
        return;
    }
    let _ = out.write_all(b"\n").await;
    let _ = out.flush().await;
}
