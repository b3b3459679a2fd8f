//! Warm pool of pre-created browser contexts.
//!
//! Sessions borrow a matching free entry instead of paying context startup;
//! on return the context is reset and parked. Disabled, the pool degrades
//! to a pass-through that always creates fresh contexts.

use crate::config::ContextPoolConfig;
use crate::error::SessionResult;
use crate::session::SessionOptions;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};
use webgate_driver::{BrowserDriver, ContextHandle, ContextParams, Viewport};

struct PooledEntry {
    id: String,
    context: Box<dyn ContextHandle>,
    viewport: Viewport,
    user_agent: Option<String>,
    last_used: Instant,
}

/// What `acquire` handed out.
pub enum AcquiredContext {
    /// Borrowed from the pool; return it with the id on destroy.
    Pooled {
        pool_id: String,
        context: Box<dyn ContextHandle>,
    },
    /// Freshly created and owned outright by the session.
    Fresh(Box<dyn ContextHandle>),
}

pub struct ContextPool {
    config: ContextPoolConfig,
    driver: Arc<dyn BrowserDriver>,
    free: Mutex<Vec<PooledEntry>>,
    borrowed: AtomicUsize,
    next_id: AtomicU64,
    reaper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ContextPool {
    pub fn new(config: ContextPoolConfig, driver: Arc<dyn BrowserDriver>) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            driver,
            free: Mutex::new(Vec::new()),
            borrowed: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            reaper: std::sync::Mutex::new(None),
        });

        if pool.config.enabled && pool.config.max_idle_ms > 0 {
            let weak = Arc::downgrade(&pool);
            let period = Duration::from_millis(pool.config.max_idle_ms.max(1_000) / 2);
            let task = tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    ticker.tick().await;
                    match weak.upgrade() {
                        Some(pool) => pool.reap_idle().await,
                        None => break,
                    }
                }
            });
            *pool.reaper.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        }

        pool
    }

    fn context_params(&self, options: &SessionOptions) -> ContextParams {
        ContextParams {
            viewport: options.viewport,
            user_agent: options.user_agent.clone(),
            ignore_tls_errors: options.ignore_tls_errors,
            bypass_csp: options.bypass_csp,
            default_timeout_ms: options.default_timeout_ms,
        }
    }

    /// Pre-create the warm minimum. Launch failures are logged and skipped.
    pub async fn warmup(&self, options: &SessionOptions) {
        if !self.config.enabled {
            return;
        }
        let mut free = self.free.lock().await;
        while free.len() < self.config.min {
            match self.driver.new_context(self.context_params(options)).await {
                Ok(context) => {
                    let id = self.allocate_id();
                    debug!(pool_id = %id, "warm context created");
                    free.push(PooledEntry {
                        id,
                        context,
                        viewport: options.viewport,
                        user_agent: options.user_agent.clone(),
                        last_used: Instant::now(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "warmup context creation failed");
                    break;
                }
            }
        }
    }

    /// Borrow a matching warm context, or create one.
    pub async fn acquire(&self, options: &SessionOptions) -> SessionResult<AcquiredContext> {
        if !self.config.enabled {
            let context = self.driver.new_context(self.context_params(options)).await?;
            return Ok(AcquiredContext::Fresh(context));
        }

        {
            let mut free = self.free.lock().await;
            if let Some(idx) = free.iter().position(|e| {
                e.viewport == options.viewport && e.user_agent == options.user_agent
            }) {
                let entry = free.remove(idx);
                drop(free);
                entry.context.set_default_timeout(options.default_timeout_ms);
                self.borrowed.fetch_add(1, Ordering::SeqCst);
                debug!(pool_id = %entry.id, "context borrowed from pool");
                return Ok(AcquiredContext::Pooled {
                    pool_id: entry.id,
                    context: entry.context,
                });
            }
        }

        let context = self.driver.new_context(self.context_params(options)).await?;
        let total = self.borrowed.load(Ordering::SeqCst) + self.free.lock().await.len();
        if total < self.config.max {
            let pool_id = self.allocate_id();
            self.borrowed.fetch_add(1, Ordering::SeqCst);
            debug!(pool_id = %pool_id, "new pooled context created");
            Ok(AcquiredContext::Pooled { pool_id, context })
        } else {
            debug!("context pool at capacity, handing out unpooled context");
            Ok(AcquiredContext::Fresh(context))
        }
    }

    /// Return a borrowed context to the free set.
    pub async fn release(
        &self,
        pool_id: String,
        context: Box<dyn ContextHandle>,
        viewport: Viewport,
        user_agent: Option<String>,
    ) {
        self.borrowed.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = context.clear_state().await {
            warn!(pool_id = %pool_id, error = %e, "context reset failed, dropping it");
            if let Err(e) = context.close().await {
                warn!(pool_id = %pool_id, error = %e, "context close failed");
            }
            return;
        }
        debug!(pool_id = %pool_id, "context returned to pool");
        self.free.lock().await.push(PooledEntry {
            id: pool_id,
            context,
            viewport,
            user_agent,
            last_used: Instant::now(),
        });
    }

    /// Close free entries idle past the TTL, keeping the warm minimum.
    async fn reap_idle(&self) {
        let ttl = Duration::from_millis(self.config.max_idle_ms);
        let mut expired = Vec::new();
        {
            let mut free = self.free.lock().await;
            let mut i = 0;
            while i < free.len() {
                if free.len() <= self.config.min {
                    break;
                }
                if free[i].last_used.elapsed() >= ttl {
                    expired.push(free.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for entry in expired {
            info!(pool_id = %entry.id, "closing idle pooled context");
            if let Err(e) = entry.context.close().await {
                warn!(pool_id = %entry.id, error = %e, "idle context close failed");
            }
        }
    }

    pub async fn free_count(&self) -> usize {
        self.free.lock().await.len()
    }

    pub fn borrowed_count(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.reaper.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        let entries: Vec<PooledEntry> = self.free.lock().await.drain(..).collect();
        for entry in entries {
            if let Err(e) = entry.context.close().await {
                warn!(pool_id = %entry.id, error = %e, "context close failed during shutdown");
            }
        }
    }

    fn allocate_id(&self) -> String {
        format!("ctx-pool-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}
