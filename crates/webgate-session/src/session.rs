//! A session: one isolated browser context, its primary page, and all
//! per-session state.

use crate::error::{SessionError, SessionResult};
use crate::records::{ConsoleRecord, NetworkRecord, RingBuffer, TraceRecord, LOG_CAP};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use webgate_driver::{ContextHandle, PageHandle, TraceOptions, Viewport};
use webgate_security::normalize_host;

/// Effective per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub default_timeout_ms: u64,
    pub client_id: Option<String>,
    pub allowed_domains: Vec<String>,
    pub ignore_tls_errors: bool,
    pub bypass_csp: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            user_agent: None,
            default_timeout_ms: 30_000,
            client_id: None,
            allowed_domains: Vec::new(),
            ignore_tls_errors: false,
            bypass_csp: false,
        }
    }
}

/// Browser-side half of a session, swapped wholesale on recreate.
pub(crate) struct BrowserSlot {
    pub context: Box<dyn ContextHandle>,
    /// Set when the context was borrowed from the context pool; returned
    /// there on destroy.
    pub pooled_id: Option<String>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    options: SessionOptions,
    last_activity: StdMutex<Instant>,
    pub(crate) browser: tokio::sync::Mutex<Option<BrowserSlot>>,
    page: StdMutex<Option<std::sync::Arc<dyn PageHandle>>>,
    allow_list: StdMutex<HashSet<String>>,
    network_logs: StdMutex<RingBuffer<NetworkRecord>>,
    console_logs: StdMutex<RingBuffer<ConsoleRecord>>,
    trace: StdMutex<Option<TraceRecord>>,
    destroyed: AtomicBool,
    pub(crate) capture_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        options: SessionOptions,
        slot: BrowserSlot,
        page: std::sync::Arc<dyn PageHandle>,
    ) -> Self {
        let allow_list = options
            .allowed_domains
            .iter()
            .map(|d| normalize_host(d))
            .collect();
        Self {
            id,
            created_at: Utc::now(),
            options,
            last_activity: StdMutex::new(Instant::now()),
            browser: tokio::sync::Mutex::new(Some(slot)),
            page: StdMutex::new(Some(page)),
            allow_list: StdMutex::new(allow_list),
            network_logs: StdMutex::new(RingBuffer::new(LOG_CAP)),
            console_logs: StdMutex::new(RingBuffer::new(LOG_CAP)),
            trace: StdMutex::new(None),
            destroyed: AtomicBool::new(false),
            capture_task: StdMutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn client_id(&self) -> Option<&str> {
        self.options.client_id.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    /// The session's primary page. Fails once the session is destroyed.
    pub fn page(&self) -> SessionResult<std::sync::Arc<dyn PageHandle>> {
        if self.is_destroyed() {
            return Err(SessionError::SessionDestroyed {
                id: self.id.clone(),
            });
        }
        self.page
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(SessionError::SessionDestroyed {
                id: self.id.clone(),
            })
    }

    pub(crate) fn replace_page(&self, page: Option<std::sync::Arc<dyn PageHandle>>) {
        *self.page.lock().unwrap_or_else(|p| p.into_inner()) = page;
    }

    /// Record activity; called by tool handlers on every successful call.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }

    /// Session allow-list grows on successful navigation grants.
    pub fn allow_domain(&self, domain: &str) {
        self.allow_list
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(normalize_host(domain));
    }

    pub fn allowed_domains(&self) -> HashSet<String> {
        self.allow_list
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn push_network(&self, record: NetworkRecord) {
        if self.is_destroyed() {
            return;
        }
        self.network_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record);
    }

    pub fn push_console(&self, record: ConsoleRecord) {
        if self.is_destroyed() {
            return;
        }
        self.console_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record);
    }

    /// Newest `limit` network records; empty once destroyed.
    pub fn network_logs(&self, limit: usize) -> Vec<NetworkRecord> {
        if self.is_destroyed() {
            return Vec::new();
        }
        self.network_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .tail(limit)
    }

    pub fn console_logs(&self, limit: usize) -> Vec<ConsoleRecord> {
        if self.is_destroyed() {
            return Vec::new();
        }
        self.console_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .tail(limit)
    }

    pub(crate) fn clear_logs(&self) {
        self.network_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.console_logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Register a trace start; at most one active trace per session.
    pub fn begin_trace(&self, options: TraceOptions, output_path: String) -> SessionResult<TraceRecord> {
        let mut trace = self.trace.lock().unwrap_or_else(|p| p.into_inner());
        if trace.as_ref().map(|t| t.active).unwrap_or(false) {
            return Err(SessionError::TraceAlreadyActive {
                id: self.id.clone(),
            });
        }
        let record = TraceRecord {
            session_id: self.id.clone(),
            started_at: Utc::now(),
            ended_at: None,
            options,
            output_path,
            active: true,
        };
        *trace = Some(record.clone());
        Ok(record)
    }

    /// Mark the active trace finished, returning its final record.
    pub fn end_trace(&self) -> SessionResult<TraceRecord> {
        let mut trace = self.trace.lock().unwrap_or_else(|p| p.into_inner());
        match trace.as_mut() {
            Some(t) if t.active => {
                t.active = false;
                t.ended_at = Some(Utc::now());
                Ok(t.clone())
            }
            _ => Err(SessionError::NoActiveTrace {
                id: self.id.clone(),
            }),
        }
    }

    pub fn active_trace(&self) -> Option<TraceRecord> {
        self.trace
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .filter(|t| t.active)
    }

    /// Start a context trace writing to `output_path` when stopped.
    pub async fn start_tracing(
        &self,
        options: TraceOptions,
        output_path: String,
    ) -> SessionResult<TraceRecord> {
        let record = self.begin_trace(options, output_path)?;
        let browser = self.browser.lock().await;
        let slot = browser.as_ref().ok_or(SessionError::SessionDestroyed {
            id: self.id.clone(),
        })?;
        if let Err(e) = slot.context.start_tracing(options).await {
            drop(browser);
            // Roll the bookkeeping back so a retry is possible.
            let _ = self.end_trace();
            *self.trace.lock().unwrap_or_else(|p| p.into_inner()) = None;
            return Err(e.into());
        }
        Ok(record)
    }

    /// Stop the active trace and write the artifact out.
    pub async fn stop_tracing(&self) -> SessionResult<TraceRecord> {
        let record = self.end_trace()?;
        let browser = self.browser.lock().await;
        let slot = browser.as_ref().ok_or(SessionError::SessionDestroyed {
            id: self.id.clone(),
        })?;
        slot.context.stop_tracing(&record.output_path).await?;
        Ok(record)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
