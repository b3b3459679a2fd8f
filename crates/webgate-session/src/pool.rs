//! The session pool: owns every live session, enforces capacity, indexes by
//! client, and reaps idle sessions.

use crate::capture::{spawn_capture, ConsoleBroadcast};
use crate::config::SessionPoolConfig;
use crate::context_pool::{AcquiredContext, ContextPool};
use crate::error::{SessionError, SessionResult};
use crate::session::{BrowserSlot, Session, SessionOptions};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use webgate_performance::PerformanceManager;

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub sessions_created_total: u64,
    pub sessions_reaped_total: u64,
    pub pooled_contexts_free: usize,
    pub pooled_contexts_borrowed: usize,
}

pub struct SessionPool {
    config: SessionPoolConfig,
    context_pool: Arc<ContextPool>,
    perf: Arc<PerformanceManager>,
    sessions: DashMap<String, Arc<Session>>,
    by_client: DashMap<String, Vec<String>>,
    /// Serialises creation (capacity check, id allocation, index insertion)
    /// and index removal; lookups and session-internal state stay lock-free
    /// against the pool.
    create_lock: Mutex<()>,
    seq: AtomicU64,
    created_total: AtomicU64,
    reaped_total: AtomicU64,
    console_tx: broadcast::Sender<ConsoleBroadcast>,
    reaper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionPool {
    pub fn new(
        config: SessionPoolConfig,
        context_pool: Arc<ContextPool>,
        perf: Arc<PerformanceManager>,
    ) -> Arc<Self> {
        let (console_tx, _) = broadcast::channel(1024);
        let pool = Arc::new(Self {
            config,
            context_pool,
            perf,
            sessions: DashMap::new(),
            by_client: DashMap::new(),
            create_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
            created_total: AtomicU64::new(0),
            reaped_total: AtomicU64::new(0),
            console_tx,
            reaper: std::sync::Mutex::new(None),
        });

        if pool.config.cleanup_interval_ms > 0 {
            let weak = Arc::downgrade(&pool);
            let period = Duration::from_millis(pool.config.cleanup_interval_ms);
            let task = tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    match weak.upgrade() {
                        Some(pool) => {
                            let reaped = pool.cleanup_idle().await;
                            if reaped > 0 {
                                info!(reaped, "idle sessions cleaned up");
                            }
                        }
                        None => break,
                    }
                }
            });
            *pool.reaper.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        }

        pool
    }

    /// Subscribe to console records from every session (socket broadcast
    /// feed).
    pub fn console_events(&self) -> broadcast::Receiver<ConsoleBroadcast> {
        self.console_tx.subscribe()
    }

    pub async fn create_session(
        &self,
        mut options: SessionOptions,
        client: Option<String>,
    ) -> SessionResult<Arc<Session>> {
        if client.is_some() {
            options.client_id = client;
        }
        if options.user_agent.is_none() {
            options.user_agent = Some(self.config.default_user_agent.clone());
        }

        let _guard = self.create_lock.lock().await;

        if self.sessions.len() >= self.config.max_sessions {
            warn!(max = self.config.max_sessions, "session capacity reached");
            return Err(SessionError::CapacityExceeded {
                max: self.config.max_sessions,
            });
        }
        self.perf
            .can_create_session()
            .await
            .map_err(|e| SessionError::ResourceExhausted(e.to_string()))?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("sess-{seq}-{}", Utc::now().timestamp_millis());

        let slot = match self.context_pool.acquire(&options).await? {
            AcquiredContext::Pooled { pool_id, context } => BrowserSlot {
                context,
                pooled_id: Some(pool_id),
            },
            AcquiredContext::Fresh(context) => BrowserSlot {
                context,
                pooled_id: None,
            },
        };

        let page = match slot.context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                // Don't leak the context on a half-built session.
                self.return_or_close(slot, &options).await;
                return Err(e.into());
            }
        };

        let session = Arc::new(Session::new(id.clone(), options, slot, page.clone()));
        let capture = spawn_capture(session.clone(), page.events(), self.console_tx.clone());
        *session
            .capture_task
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(capture);

        self.sessions.insert(id.clone(), session.clone());
        if let Some(client) = session.client_id() {
            self.by_client
                .entry(client.to_string())
                .or_default()
                .push(id.clone());
        }
        self.created_total.fetch_add(1, Ordering::SeqCst);

        info!(session_id = %id, client_id = ?session.client_id(), "session created");
        Ok(session)
    }

    /// Live session lookup; destroyed or unknown ids yield nothing.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .filter(|s| !s.is_destroyed())
    }

    pub fn sessions_for_client(&self, client: &str) -> Vec<Arc<Session>> {
        self.by_client
            .get(client)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get_session(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Destroy a session. Idempotent and best-effort: adapter errors are
    /// logged, the session always leaves the indices.
    pub async fn destroy_session(&self, id: &str) -> bool {
        let session = {
            let _guard = self.create_lock.lock().await;
            let removed = self.sessions.remove(id).map(|(_, s)| s);
            if let Some(session) = &removed {
                if let Some(client) = session.client_id() {
                    if let Some(mut ids) = self.by_client.get_mut(client) {
                        ids.retain(|sid| sid != id);
                    }
                }
            }
            removed
        };
        match session {
            Some(session) => {
                self.teardown(session).await;
                true
            }
            None => false,
        }
    }

    pub async fn destroy_sessions_for_client(&self, client: &str) -> usize {
        let ids: Vec<String> = self
            .by_client
            .get(client)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut destroyed = 0;
        for id in ids {
            if self.destroy_session(&id).await {
                destroyed += 1;
            }
        }
        self.by_client.remove(client);
        destroyed
    }

    /// Destroy sessions idle past the configured timeout. Per-session
    /// failures do not abort the sweep.
    pub async fn cleanup_idle(&self) -> usize {
        let timeout = Duration::from_millis(self.config.session_timeout_ms);
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in idle {
            debug!(session_id = %id, "reaping idle session");
            if self.destroy_session(&id).await {
                reaped += 1;
            }
        }
        self.reaped_total.fetch_add(reaped as u64, Ordering::SeqCst);
        reaped as usize
    }

    /// Rebuild a session's context and page, preserving its id, options and
    /// log history.
    pub async fn recreate_session(&self, id: &str) -> SessionResult<Arc<Session>> {
        let session = self
            .get_session(id)
            .ok_or_else(|| SessionError::SessionNotFound { id: id.to_string() })?;

        if let Some(task) = session
            .capture_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            task.abort();
        }
        if let Some(slot) = session.browser.lock().await.take() {
            self.stop_trace_if_active(&session, &slot).await;
            self.return_or_close(slot, session.options()).await;
        }

        let options = session.options().clone();
        let slot = match self.context_pool.acquire(&options).await? {
            AcquiredContext::Pooled { pool_id, context } => BrowserSlot {
                context,
                pooled_id: Some(pool_id),
            },
            AcquiredContext::Fresh(context) => BrowserSlot {
                context,
                pooled_id: None,
            },
        };
        let page = slot.context.new_page().await?;
        *session.browser.lock().await = Some(slot);
        session.replace_page(Some(page.clone()));

        let capture = spawn_capture(session.clone(), page.events(), self.console_tx.clone());
        *session
            .capture_task
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(capture);
        session.touch();

        info!(session_id = %id, "session recreated");
        Ok(session)
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            active_sessions: self.sessions.len(),
            max_sessions: self.config.max_sessions,
            sessions_created_total: self.created_total.load(Ordering::SeqCst),
            sessions_reaped_total: self.reaped_total.load(Ordering::SeqCst),
            pooled_contexts_free: self.context_pool.free_count().await,
            pooled_contexts_borrowed: self.context_pool.borrowed_count(),
        }
    }

    /// Destroy everything and stop background tasks.
    pub async fn shutdown(&self) {
        if let Some(task) = self.reaper.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.destroy_session(&id).await;
        }
        self.context_pool.shutdown().await;
        info!("session pool shut down");
    }

    async fn teardown(&self, session: Arc<Session>) {
        if !session.mark_destroyed() {
            return;
        }
        if let Some(task) = session
            .capture_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            task.abort();
        }
        if let Some(slot) = session.browser.lock().await.take() {
            self.stop_trace_if_active(&session, &slot).await;
            self.return_or_close(slot, session.options()).await;
        }
        session.replace_page(None);
        session.clear_logs();
        debug!(session_id = %session.id(), "session destroyed");
    }

    async fn stop_trace_if_active(&self, session: &Arc<Session>, slot: &BrowserSlot) {
        if let Ok(record) = session.end_trace() {
            if let Err(e) = slot.context.stop_tracing(&record.output_path).await {
                error!(
                    session_id = %session.id(),
                    path = %record.output_path,
                    error = %e,
                    "failed to stop trace during teardown"
                );
            }
        }
    }

    async fn return_or_close(&self, slot: BrowserSlot, options: &SessionOptions) {
        match slot.pooled_id {
            Some(pool_id) => {
                self.context_pool
                    .release(
                        pool_id,
                        slot.context,
                        options.viewport,
                        options.user_agent.clone(),
                    )
                    .await;
            }
            None => {
                if let Err(e) = slot.context.close().await {
                    warn!(error = %e, "context close failed during teardown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextPoolConfig;
    use webgate_driver::mock::MockDriver;
    use webgate_driver::TraceOptions;
    use webgate_performance::{PerformanceConfig, PerformanceManager};

    async fn pool_with(
        max_sessions: usize,
        pool_enabled: bool,
    ) -> (Arc<SessionPool>, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        let context_pool = ContextPool::new(
            ContextPoolConfig {
                enabled: pool_enabled,
                ..ContextPoolConfig::default()
            },
            driver.clone(),
        );
        let perf = Arc::new(
            PerformanceManager::new(PerformanceConfig {
                temp_dir: Some(std::env::temp_dir().join("webgate-pool-tests")),
                ..PerformanceConfig::default()
            })
            .await
            .unwrap(),
        );
        let pool = SessionPool::new(
            SessionPoolConfig {
                max_sessions,
                cleanup_interval_ms: 0,
                ..SessionPoolConfig::default()
            },
            context_pool,
            perf,
        );
        (pool, driver)
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let (pool, _driver) = pool_with(2, false).await;
        pool.create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        pool.create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        let err = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded { max: 2 }));
        assert_eq!(pool.stats().await.active_sessions, 2);
    }

    #[tokio::test]
    async fn concurrent_creation_respects_capacity() {
        let (pool, _driver) = pool_with(3, false).await;
        pool.create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        pool.create_session(SessionOptions::default(), None)
            .await
            .unwrap();

        // Two racing creations at capacity - 1: exactly one wins.
        let a = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.create_session(SessionOptions::default(), None).await
            })
        };
        let b = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.create_session(SessionOptions::default(), None).await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert_eq!(pool.stats().await.active_sessions, 3);
    }

    #[tokio::test]
    async fn session_ids_are_monotone() {
        let (pool, _driver) = pool_with(5, false).await;
        let a = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        let b = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        assert!(a.id().starts_with("sess-1-"));
        assert!(b.id().starts_with("sess-2-"));
    }

    #[tokio::test]
    async fn destroyed_session_reads_empty() {
        let (pool, driver) = pool_with(2, false).await;
        let session = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        let id = session.id().to_string();

        session.push_console(crate::records::ConsoleRecord {
            timestamp: Utc::now(),
            level: webgate_driver::ConsoleLevel::Log,
            message: "hello".into(),
            location: None,
        });
        assert_eq!(session.console_logs(10).len(), 1);

        assert!(pool.destroy_session(&id).await);
        assert!(pool.get_session(&id).is_none());
        assert!(session.console_logs(10).is_empty());
        assert!(session.network_logs(10).is_empty());
        assert!(session.page().is_err());
        assert_eq!(driver.contexts_open(), 0);

        // Idempotent.
        assert!(!pool.destroy_session(&id).await);
    }

    #[tokio::test]
    async fn pooled_context_is_returned_once() {
        let (pool, _driver) = pool_with(2, true).await;
        let session = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        let id = session.id().to_string();
        assert_eq!(pool.stats().await.pooled_contexts_borrowed, 1);

        assert!(pool.destroy_session(&id).await);
        let stats = pool.stats().await;
        assert_eq!(stats.pooled_contexts_borrowed, 0);
        assert_eq!(stats.pooled_contexts_free, 1);

        // A second destroy must not double-return the context.
        pool.destroy_session(&id).await;
        assert_eq!(pool.stats().await.pooled_contexts_free, 1);
    }

    #[tokio::test]
    async fn client_index_supports_bulk_destroy() {
        let (pool, _driver) = pool_with(5, false).await;
        pool.create_session(SessionOptions::default(), Some("ide-1".into()))
            .await
            .unwrap();
        pool.create_session(SessionOptions::default(), Some("ide-1".into()))
            .await
            .unwrap();
        pool.create_session(SessionOptions::default(), Some("ide-2".into()))
            .await
            .unwrap();

        assert_eq!(pool.sessions_for_client("ide-1").len(), 2);
        assert_eq!(pool.destroy_sessions_for_client("ide-1").await, 2);
        assert!(pool.sessions_for_client("ide-1").is_empty());
        assert_eq!(pool.stats().await.active_sessions, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped() {
        let driver = Arc::new(MockDriver::new());
        let context_pool = ContextPool::new(
            ContextPoolConfig {
                enabled: false,
                ..ContextPoolConfig::default()
            },
            driver.clone(),
        );
        let perf = Arc::new(
            PerformanceManager::new(PerformanceConfig {
                temp_dir: Some(std::env::temp_dir().join("webgate-pool-tests")),
                ..PerformanceConfig::default()
            })
            .await
            .unwrap(),
        );
        let pool = SessionPool::new(
            SessionPoolConfig {
                max_sessions: 5,
                session_timeout_ms: 10,
                cleanup_interval_ms: 0,
                ..SessionPoolConfig::default()
            },
            context_pool,
            perf,
        );

        let session = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.cleanup_idle().await, 1);
        assert!(pool.get_session(session.id()).is_none());
    }

    #[tokio::test]
    async fn recreate_preserves_id_and_history() {
        let (pool, driver) = pool_with(2, false).await;
        let session = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        let id = session.id().to_string();
        session.push_console(crate::records::ConsoleRecord {
            timestamp: Utc::now(),
            level: webgate_driver::ConsoleLevel::Log,
            message: "before".into(),
            location: None,
        });

        let recreated = pool.recreate_session(&id).await.unwrap();
        assert_eq!(recreated.id(), id);
        assert_eq!(recreated.console_logs(10).len(), 1);
        assert_eq!(driver.contexts_created(), 2);
        assert!(recreated.page().is_ok());
    }

    #[tokio::test]
    async fn shutdown_with_active_trace_stops_it() {
        let (pool, driver) = pool_with(2, false).await;
        let session = pool
            .create_session(SessionOptions::default(), None)
            .await
            .unwrap();
        session
            .begin_trace(TraceOptions::default(), "/tmp/trace.json".into())
            .unwrap();

        pool.shutdown().await;
        assert!(session.active_trace().is_none());
        assert!(session.is_destroyed());
        assert_eq!(driver.contexts_open(), 0);
        assert_eq!(pool.stats().await.active_sessions, 0);
    }
}
