//! Scriptable in-memory engine for tests.
//!
//! No browser is launched: pages record the operations applied to them,
//! navigation succeeds with a scripted status, evaluation answers from a
//! scripted table, and tests can inject arbitrary [`PageEvent`]s to drive
//! the capture pipeline.

use crate::error::{DriverError, DriverResult};
use crate::events::PageEvent;
use crate::params::{
    ClickParams, ContextParams, GotoParams, NavigationResult, ScreenshotParams, TraceOptions,
};
use crate::traits::{BrowserDriver, ContextHandle, PageHandle};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// An operation a mock page observed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    Goto(String),
    Click(String),
    Fill { selector: String, text: String },
    Select { selector: String, value: String },
    Evaluate(String),
    Screenshot,
    Close,
}

#[derive(Default)]
struct SharedState {
    contexts_created: AtomicUsize,
    contexts_open: AtomicUsize,
    fail_next_context: AtomicBool,
    pages: Mutex<Vec<Arc<MockPage>>>,
    closed: AtomicBool,
}

/// Scriptable driver.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<SharedState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contexts_created(&self) -> usize {
        self.state.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_open(&self) -> usize {
        self.state.contexts_open.load(Ordering::SeqCst)
    }

    /// Make the next `new_context` call fail with a launch error.
    pub fn fail_next_context(&self) {
        self.state.fail_next_context.store(true, Ordering::SeqCst);
    }

    /// All pages created so far, oldest first.
    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.state.pages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// The most recently created page.
    pub fn last_page(&self) -> Option<Arc<MockPage>> {
        self.pages().last().cloned()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn new_context(&self, params: ContextParams) -> DriverResult<Box<dyn ContextHandle>> {
        if self.state.fail_next_context.swap(false, Ordering::SeqCst) {
            return Err(DriverError::LaunchFailed {
                message: "scripted context failure".into(),
            });
        }
        let n = self.state.contexts_created.fetch_add(1, Ordering::SeqCst);
        self.state.contexts_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            id: format!("mock-ctx-{n}"),
            params,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
            cleared: AtomicUsize::new(0),
            tracing: Mutex::new(None),
            trace_stopped_to: Mutex::new(None),
        }))
    }

    async fn version(&self) -> DriverResult<String> {
        Ok("MockBrowser/1.0".into())
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockContext {
    id: String,
    pub params: ContextParams,
    state: Arc<SharedState>,
    closed: AtomicBool,
    cleared: AtomicUsize,
    tracing: Mutex<Option<TraceOptions>>,
    trace_stopped_to: Mutex<Option<String>>,
}

impl MockContext {
    pub fn clear_count(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextHandle for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::ContextClosed);
        }
        let page = Arc::new(MockPage::new());
        self.state
            .pages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(page.clone());
        Ok(page)
    }

    fn set_default_timeout(&self, _timeout_ms: u64) {}

    async fn clear_state(&self) -> DriverResult<()> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_tracing(&self, options: TraceOptions) -> DriverResult<()> {
        *self.tracing.lock().unwrap_or_else(|p| p.into_inner()) = Some(options);
        Ok(())
    }

    async fn stop_tracing(&self, path: &str) -> DriverResult<()> {
        let mut tracing = self.tracing.lock().unwrap_or_else(|p| p.into_inner());
        if tracing.take().is_none() {
            return Err(DriverError::protocol("tracing is not active"));
        }
        *self.trace_stopped_to.lock().unwrap_or_else(|p| p.into_inner()) =
            Some(path.to_string());
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.contexts_open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct MockPage {
    events_tx: broadcast::Sender<PageEvent>,
    url: Mutex<String>,
    ops: Mutex<Vec<RecordedOp>>,
    eval_results: Mutex<HashMap<String, serde_json::Value>>,
    missing_selectors: Mutex<HashSet<String>>,
    nav_failures: Mutex<HashMap<String, String>>,
    screenshot_bytes: Mutex<Vec<u8>>,
    nav_status: Mutex<i64>,
}

impl MockPage {
    fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            events_tx,
            url: Mutex::new("about:blank".into()),
            ops: Mutex::new(Vec::new()),
            eval_results: Mutex::new(HashMap::new()),
            missing_selectors: Mutex::new(HashSet::new()),
            nav_failures: Mutex::new(HashMap::new()),
            // Smallest possible PNG-looking payload.
            screenshot_bytes: Mutex::new(vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0]),
            nav_status: Mutex::new(200),
        }
    }

    /// Inject a page event as if the browser emitted it.
    pub fn emit(&self, event: PageEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Script the value returned when exactly `code` is evaluated.
    pub fn script_eval(&self, code: &str, value: serde_json::Value) {
        self.eval_results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(code.to_string(), value);
    }

    /// Make interactions with `selector` fail with `ElementNotFound`.
    pub fn remove_selector(&self, selector: &str) {
        self.missing_selectors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(selector.to_string());
    }

    /// Script a navigation failure for `url`.
    pub fn fail_navigation(&self, url: &str, error: &str) {
        self.nav_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.to_string(), error.to_string());
    }

    pub fn set_nav_status(&self, status: i64) {
        *self.nav_status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    pub fn set_screenshot_bytes(&self, bytes: Vec<u8>) {
        *self.screenshot_bytes.lock().unwrap_or_else(|p| p.into_inner()) = bytes;
    }

    /// Operations applied to this page, in order.
    pub fn ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().unwrap_or_else(|p| p.into_inner()).push(op);
    }

    fn check_selector(&self, selector: &str) -> DriverResult<()> {
        let missing = self
            .missing_selectors
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if missing.contains(selector) {
            Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn goto(&self, url: &str, _params: GotoParams) -> DriverResult<NavigationResult> {
        if let Some(error) = self
            .nav_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(url)
            .cloned()
        {
            return Err(DriverError::NetworkError { message: error });
        }
        *self.url.lock().unwrap_or_else(|p| p.into_inner()) = url.to_string();
        self.record(RecordedOp::Goto(url.to_string()));
        self.emit(PageEvent::FrameNavigated {
            url: url.to_string(),
            is_main_frame: true,
        });
        Ok(NavigationResult {
            final_url: url.to_string(),
            status: *self.nav_status.lock().unwrap_or_else(|p| p.into_inner()),
        })
    }

    async fn click(&self, selector: &str, _params: ClickParams) -> DriverResult<()> {
        self.check_selector(selector)?;
        self.record(RecordedOp::Click(selector.to_string()));
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, _timeout_ms: Option<u64>) -> DriverResult<()> {
        self.check_selector(selector)?;
        self.record(RecordedOp::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        _timeout_ms: Option<u64>,
    ) -> DriverResult<()> {
        self.check_selector(selector)?;
        self.record(RecordedOp::Select {
            selector: selector.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn evaluate(&self, code: &str) -> DriverResult<serde_json::Value> {
        self.record(RecordedOp::Evaluate(code.to_string()));
        Ok(self
            .eval_results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(code)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self, _params: ScreenshotParams) -> DriverResult<Vec<u8>> {
        self.record(RecordedOp::Screenshot);
        Ok(self
            .screenshot_bytes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    async fn bounding_box(&self, selector: &str) -> DriverResult<(f64, f64, f64, f64)> {
        self.check_selector(selector)?;
        Ok((0.0, 0.0, 100.0, 40.0))
    }

    async fn content(&self) -> DriverResult<String> {
        Ok("<html><body></body></html>".into())
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self.url.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events_tx.subscribe()
    }

    async fn close(&self) -> DriverResult<()> {
        self.record(RecordedOp::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_pages_record_operations() {
        let driver = MockDriver::new();
        let ctx = driver.new_context(ContextParams::default()).await.unwrap();
        let page = ctx.new_page().await.unwrap();

        page.goto("https://example.com", GotoParams::default())
            .await
            .unwrap();
        page.click("#go", ClickParams::default()).await.unwrap();
        page.fill("#name", "Jane", None).await.unwrap();

        let mock = driver.last_page().unwrap();
        assert_eq!(
            mock.ops(),
            vec![
                RecordedOp::Goto("https://example.com".into()),
                RecordedOp::Click("#go".into()),
                RecordedOp::Fill {
                    selector: "#name".into(),
                    text: "Jane".into()
                },
            ]
        );
        assert_eq!(page.url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn navigation_emits_main_frame_event() {
        let driver = MockDriver::new();
        let ctx = driver.new_context(ContextParams::default()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        let mut events = page.events();

        page.goto("https://example.com", GotoParams::default())
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            PageEvent::FrameNavigated { url, is_main_frame } => {
                assert_eq!(url, "https://example.com");
                assert!(is_main_frame);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_typed_errors() {
        let driver = MockDriver::new();
        let ctx = driver.new_context(ContextParams::default()).await.unwrap();
        let page = ctx.new_page().await.unwrap();

        let mock = driver.last_page().unwrap();
        mock.remove_selector("#missing");
        mock.fail_navigation("https://bad.test", "net::ERR_NAME_NOT_RESOLVED");

        assert!(matches!(
            page.click("#missing", ClickParams::default()).await,
            Err(DriverError::ElementNotFound { .. })
        ));
        assert!(matches!(
            page.goto("https://bad.test", GotoParams::default()).await,
            Err(DriverError::NetworkError { .. })
        ));
    }

    #[tokio::test]
    async fn context_close_is_tracked() {
        let driver = MockDriver::new();
        let ctx = driver.new_context(ContextParams::default()).await.unwrap();
        assert_eq!(driver.contexts_open(), 1);
        ctx.close().await.unwrap();
        ctx.close().await.unwrap();
        assert_eq!(driver.contexts_open(), 0);
    }
}
