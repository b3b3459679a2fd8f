//! Engine-neutral driver interface.

use crate::error::DriverResult;
use crate::events::PageEvent;
use crate::params::{
    ClickParams, ContextParams, GotoParams, NavigationResult, ScreenshotParams, TraceOptions,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A running browser process.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open an isolated browser context (own cookies and storage).
    async fn new_context(&self, params: ContextParams) -> DriverResult<Box<dyn ContextHandle>>;

    /// Browser product/version string.
    async fn version(&self) -> DriverResult<String>;

    /// Tear down the browser process.
    async fn close(&self) -> DriverResult<()>;
}

/// An isolated browser context owned by exactly one session (or parked in
/// the context pool between sessions).
#[async_trait]
pub trait ContextHandle: Send + Sync {
    fn id(&self) -> &str;

    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>>;

    /// Adjust the timeout applied when a per-call timeout is absent.
    fn set_default_timeout(&self, timeout_ms: u64);

    /// Reset the context for reuse: park pages on about:blank and clear
    /// cookies/storage.
    async fn clear_state(&self) -> DriverResult<()>;

    async fn start_tracing(&self, options: TraceOptions) -> DriverResult<()>;

    /// Stop tracing and write the trace artifact to `path`.
    async fn stop_tracing(&self, path: &str) -> DriverResult<()>;

    async fn close(&self) -> DriverResult<()>;
}

/// A single page within a context.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str, params: GotoParams) -> DriverResult<NavigationResult>;

    async fn click(&self, selector: &str, params: ClickParams) -> DriverResult<()>;

    /// Clear the target element and type `text` into it.
    async fn fill(&self, selector: &str, text: &str, timeout_ms: Option<u64>) -> DriverResult<()>;

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout_ms: Option<u64>,
    ) -> DriverResult<()>;

    async fn evaluate(&self, code: &str) -> DriverResult<serde_json::Value>;

    async fn screenshot(&self, params: ScreenshotParams) -> DriverResult<Vec<u8>>;

    /// Rounded bounding box (x, y, width, height) of the first element
    /// matching `selector`.
    async fn bounding_box(&self, selector: &str) -> DriverResult<(f64, f64, f64, f64)>;

    async fn content(&self) -> DriverResult<String>;

    async fn url(&self) -> DriverResult<String>;

    /// Subscribe to the page's event stream.
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    async fn close(&self) -> DriverResult<()>;
}
