//! WebSocket transport: JSON-RPC frames on the `/mcp` path, plus a health
//! endpoint.

use crate::dispatch::dispatch;
use crate::gateway::AppState;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
struct WsState {
    app: Arc<AppState>,
    shutdown: broadcast::Sender<()>,
}

pub async fn run(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (conn_shutdown, _) = broadcast::channel(1);
    let ws_state = WsState {
        app: state.clone(),
        shutdown: conn_shutdown.clone(),
    };

    let router = Router::new()
        .route("/mcp", get(upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(ws_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.socket_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = state.config.socket_port, "socket transport listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            // Kick every open connection loose, then let the listener close.
            let _ = conn_shutdown.send(());
            info!("socket transport shutting down");
        })
        .await?;
    Ok(())
}

async fn healthz(State(state): State<WsState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.app.sessions.stats().await,
        "performance": state.app.perf.stats().await,
    }))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: WsState) {
    let client_id = format!("ws-{}", Uuid::new_v4());
    info!(client_id = %client_id, "socket client connected");

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    // Every new connection gets the server info up front.
    let established = JsonRpcNotification::new(
        "connection.established",
        json!({
            "clientId": client_id,
            "serverInfo": state.app.server_info(),
        }),
    );
    if send_json(&sender, &established).await.is_err() {
        return;
    }

    // Broadcast feed: console.log and tool registration changes.
    let forwarder = {
        let sender = sender.clone();
        let mut notifications = state.app.notifications.subscribe();
        let client_id = client_id.clone();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        if send_json(&sender, &notification).await.is_err() {
                            debug!(client_id = %client_id, "notification send failed, stopping forwarder");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(client_id = %client_id, missed, "socket client lagging on notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let mut shutdown = state.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(client_id = %client_id, "closing connection for shutdown");
                let _ = sender.lock().await.send(Message::Close(None)).await;
                break;
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let response = match serde_json::from_str::<JsonRpcRequest>(&text) {
                        Ok(request) => {
                            debug!(client_id = %client_id, method = %request.method, "socket request");
                            dispatch(&state.app, request, &client_id).await
                        }
                        Err(e) => {
                            warn!(client_id = %client_id, error = %e, "unparseable socket frame");
                            Some(JsonRpcResponse::parse_error())
                        }
                    };
                    if let Some(response) = response {
                        if send_json(&sender, &response).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.lock().await.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(client_id = %client_id, "socket client disconnected");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(client_id = %client_id, error = %e, "socket receive error");
                    break;
                }
            }
        }
    }

    forwarder.abort();
}

async fn send_json<T: serde::Serialize>(
    sender: &Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
    value: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(value).map_err(axum::Error::new)?;
    sender.lock().await.send(Message::Text(json)).await
}
