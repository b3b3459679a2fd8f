//! Orchestrator: builds every component in dependency order, registers the
//! canonical tool set, bridges capture into socket notifications, and owns
//! startup/shutdown.

use crate::config::GatewayConfig;
use crate::protocol::JsonRpcNotification;
use crate::registry::ToolRegistry;
use crate::tools;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use webgate_driver::BrowserDriver;
use webgate_performance::PerformanceManager;
use webgate_replay::{MacroPlayer, MacroRecorder, MacroStorage, MemoryStorage};
use webgate_security::{EvalPolicy, SecurityManager};
use webgate_session::{ContextPool, SessionOptions, SessionPool};

/// Everything tool handlers and transports share.
pub struct AppState {
    pub config: GatewayConfig,
    pub driver: Arc<dyn BrowserDriver>,
    pub sessions: Arc<SessionPool>,
    pub context_pool: Arc<ContextPool>,
    pub security: Arc<SecurityManager>,
    pub perf: Arc<PerformanceManager>,
    pub storage: Arc<dyn MacroStorage>,
    pub recorder: Arc<MacroRecorder>,
    pub player: Arc<MacroPlayer>,
    pub registry: Arc<ToolRegistry>,
    pub notifications: broadcast::Sender<JsonRpcNotification>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn server_info(&self) -> serde_json::Value {
        json!({
            "name": "webgate",
            "version": env!("CARGO_PKG_VERSION"),
            "transports": {
                "stdio": self.config.enable_stdio,
                "socket": self.config.enable_socket,
            },
        })
    }
}

pub struct Gateway {
    state: Arc<AppState>,
    console_bridge: tokio::task::JoinHandle<()>,
}

impl Gateway {
    /// Wire A through I in dependency order and register the tool set.
    pub async fn new(
        config: GatewayConfig,
        driver: Arc<dyn BrowserDriver>,
    ) -> anyhow::Result<Self> {
        let perf = Arc::new(PerformanceManager::new(config.performance()).await?);
        let security = Arc::new(SecurityManager::new(config.security()));
        let context_pool = ContextPool::new(config.context_pool_config(), driver.clone());
        let sessions = SessionPool::new(config.session_pool(), context_pool.clone(), perf.clone());

        let storage: Arc<dyn MacroStorage> = Arc::new(MemoryStorage::new());
        let recorder = Arc::new(MacroRecorder::new(storage.clone()));
        let player = Arc::new(MacroPlayer::new(
            storage.clone(),
            Arc::new(EvalPolicy::new(config.eval_denied_patterns.clone())),
        ));

        let (notifications, _) = broadcast::channel(1024);
        let registry = Arc::new(ToolRegistry::new(notifications.clone()));

        let state = Arc::new(AppState {
            driver,
            sessions: sessions.clone(),
            context_pool: context_pool.clone(),
            security,
            perf,
            storage,
            recorder,
            player,
            registry,
            notifications: notifications.clone(),
            started_at: Utc::now(),
            config,
        });

        tools::register_all(&state).map_err(|e| anyhow::anyhow!("tool registration: {e}"))?;

        // Bridge capture -> socket notifications.
        let console_bridge = {
            let mut console_rx = sessions.console_events();
            let notifications = notifications.clone();
            tokio::spawn(async move {
                loop {
                    match console_rx.recv().await {
                        Ok(event) => {
                            let _ = notifications.send(JsonRpcNotification::new(
                                "console.log",
                                json!({
                                    "sessionId": event.session_id,
                                    "level": event.record.level.as_str(),
                                    "message": event.record.message,
                                    "timestamp": event.record.timestamp,
                                    "location": event.record.location,
                                }),
                            ));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        if state.config.context_pool.warmup_on_start {
            let options = SessionOptions {
                viewport: state.config.default_viewport(),
                user_agent: Some(state.config.default_user_agent.clone()),
                ..SessionOptions::default()
            };
            context_pool.warmup(&options).await;
        }

        info!(
            tools = state.registry.list().len(),
            socket = state.config.enable_socket,
            stdio = state.config.enable_stdio,
            "gateway assembled"
        );
        Ok(Self {
            state,
            console_bridge,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Composite status for health checks and `server.info` clients.
    pub async fn status(&self) -> serde_json::Value {
        let pool = self.state.sessions.stats().await;
        let perf = self.state.perf.stats().await;
        let circuits: Vec<_> = self
            .state
            .perf
            .circuits()
            .states()
            .into_iter()
            .map(|(name, state)| json!({"name": name, "state": format!("{state:?}")}))
            .collect();
        json!({
            "uptimeSeconds": (Utc::now() - self.state.started_at).num_seconds(),
            "sessions": pool,
            "performance": perf,
            "circuits": circuits,
            "tools": self.state.registry.list().len(),
        })
    }

    /// Run both transports until `shutdown` fires, then drain.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let mut handles = Vec::new();
        if self.state.config.enable_stdio {
            let state = self.state.clone();
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                crate::transport::stdio::run(state, rx).await;
            }));
        }
        if self.state.config.enable_socket {
            let state = self.state.clone();
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = crate::transport::ws::run(state, rx).await {
                    warn!(error = %e, "socket transport exited with error");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Tear everything down: sessions (stopping traces), pooled contexts,
    /// then the browser.
    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.state.sessions.shutdown().await;
        self.console_bridge.abort();
        if let Err(e) = self.state.driver.close().await {
            warn!(error = %e, "driver close failed");
        }
        info!("gateway shutdown complete");
    }
}
