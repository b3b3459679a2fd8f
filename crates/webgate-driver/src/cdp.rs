//! chromiumoxide-backed engine.
//!
//! One `Browser::launch` per gateway instance; isolated contexts are CDP
//! browser contexts (`Target.createBrowserContext`), pages are targets
//! created inside them. CDP events are pumped into the page's broadcast
//! channel so the capture pipeline never touches chromiumoxide types.

use crate::error::{DriverError, DriverResult};
use crate::events::{ConsoleLevel, PageEvent, SourceLocation, MAX_CAPTURED_BODY_BYTES};
use crate::params::{
    ClickParams, ContextParams, GotoParams, NavigationResult, ScreenshotFormat, ScreenshotParams,
    TraceOptions, WaitUntil,
};
use crate::traits::{BrowserDriver, ContextHandle, PageHandle};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::io::ReadParams;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    self as cdp_page, CaptureScreenshotFormat, EventFrameNavigated,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::browser_protocol::tracing::{
    EndParams as TracingEndParams, EventTracingComplete, StartParams as TracingStartParams,
    StartTransferMode, TraceConfig,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self as cdp_runtime, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Launch options for the single browser process.
#[derive(Debug, Clone)]
pub struct CdpDriverConfig {
    pub headless: bool,
    pub no_sandbox: bool,
    pub executable: Option<std::path::PathBuf>,
}

impl Default for CdpDriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            executable: None,
        }
    }
}

/// The one browser process behind the gateway.
pub struct CdpDriver {
    browser: Arc<Mutex<Option<Browser>>>,
    handler_task: tokio::task::JoinHandle<()>,
    // Profile directory lives as long as the browser.
    _profile_dir: TempDir,
}

impl CdpDriver {
    pub async fn launch(config: CdpDriverConfig) -> DriverResult<Self> {
        let profile_dir = TempDir::new().map_err(|e| DriverError::LaunchFailed {
            message: format!("failed to create profile directory: {e}"),
        })?;

        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-timer-throttling")
            .user_data_dir(profile_dir.path());
        if config.headless {
            builder = builder.new_headless_mode();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(|e| DriverError::LaunchFailed {
            message: e,
        })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::LaunchFailed {
                message: e.to_string(),
            })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser event handler error");
                }
            }
            debug!("browser event handler ended");
        });

        debug!(headless = config.headless, "browser launched");

        Ok(Self {
            browser: Arc::new(Mutex::new(Some(browser))),
            handler_task,
            _profile_dir: profile_dir,
        })
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn new_context(&self, params: ContextParams) -> DriverResult<Box<dyn ContextHandle>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(DriverError::ContextClosed)?;

        let resp = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        let context_id = resp.result.browser_context_id.clone();
        let id = context_id.inner().clone();

        debug!(context_id = %id, "browser context created");

        Ok(Box::new(CdpContext {
            id,
            context_id,
            browser: self.browser.clone(),
            params,
            pages: Mutex::new(Vec::new()),
            default_timeout_ms: AtomicU64::new(30_000),
        }))
    }

    async fn version(&self) -> DriverResult<String> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(DriverError::ContextClosed)?;
        let version = browser
            .version()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        Ok(version.product)
    }

    async fn close(&self) -> DriverResult<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "error closing browser");
            }
        }
        self.handler_task.abort();
        Ok(())
    }
}

/// An isolated CDP browser context.
pub struct CdpContext {
    id: String,
    context_id: chromiumoxide::cdp::browser_protocol::browser::BrowserContextId,
    browser: Arc<Mutex<Option<Browser>>>,
    params: ContextParams,
    pages: Mutex<Vec<Page>>,
    default_timeout_ms: AtomicU64,
}

impl CdpContext {
    async fn configure_page(&self, page: &Page) -> DriverResult<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(self.params.viewport.width as i64)
            .height(self.params.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(DriverError::protocol)?;
        page.execute(metrics)
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;

        if let Some(ua) = &self.params.user_agent {
            page.set_user_agent(ua.as_str())
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?;
        }
        if self.params.ignore_tls_errors {
            page.execute(SetIgnoreCertificateErrorsParams::new(true))
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?;
        }
        if self.params.bypass_csp {
            page.execute(cdp_page::SetBypassCspParams::new(true))
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?;
        }

        // Event domains must be enabled before listeners yield anything.
        page.execute(network::EnableParams::default())
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        page.execute(cdp_runtime::EnableParams::default())
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        page.execute(cdp_page::EnableParams::default())
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ContextHandle for CdpContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn PageHandle>> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard.as_ref().ok_or(DriverError::ContextClosed)?;
            let mut target = CreateTargetParams::new("about:blank");
            target.browser_context_id = Some(self.context_id.clone());
            browser
                .new_page(target)
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?
        };

        self.configure_page(&page).await?;
        self.pages.lock().await.push(page.clone());

        let default_timeout = Arc::new(AtomicU64::new(
            self.default_timeout_ms.load(Ordering::Relaxed),
        ));
        Ok(Arc::new(CdpPage::spawn(page, default_timeout).await))
    }

    fn set_default_timeout(&self, timeout_ms: u64) {
        self.default_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    async fn clear_state(&self) -> DriverResult<()> {
        let pages = self.pages.lock().await;
        for page in pages.iter() {
            if let Err(e) = page.goto("about:blank").await {
                warn!(error = %e, "failed to park page during context reset");
            }
            if let Err(e) = page
                .execute(network::ClearBrowserCookiesParams::default())
                .await
            {
                warn!(error = %e, "failed to clear cookies during context reset");
            }
        }
        Ok(())
    }

    async fn start_tracing(&self, options: TraceOptions) -> DriverResult<()> {
        let pages = self.pages.lock().await;
        let page = pages.first().ok_or(DriverError::ContextClosed)?;

        let mut categories = vec!["devtools.timeline", "v8.execute"];
        if options.screenshots {
            categories.push("disabled-by-default-devtools.screenshot");
        }
        if options.snapshots {
            categories.push("disabled-by-default-devtools.timeline.layers");
        }
        if options.sources {
            categories.push("disabled-by-default-devtools.timeline.stack");
        }
        let trace_config = TraceConfig::builder()
            .included_categories(categories)
            .build();
        let params = TracingStartParams::builder()
            .trace_config(trace_config)
            .transfer_mode(StartTransferMode::ReturnAsStream)
            .build();
        page.execute(params)
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        Ok(())
    }

    async fn stop_tracing(&self, path: &str) -> DriverResult<()> {
        let page = {
            let pages = self.pages.lock().await;
            pages.first().cloned().ok_or(DriverError::ContextClosed)?
        };

        // Subscribe before ending so the completion event cannot be missed.
        let mut complete = page
            .event_listener::<EventTracingComplete>()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        page.execute(TracingEndParams::default())
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;

        let event = timeout(Duration::from_secs(30), complete.next())
            .await
            .map_err(|_| DriverError::timeout("tracing.stop", 30_000))?
            .ok_or_else(|| DriverError::protocol("tracing completion stream ended"))?;

        let handle = event
            .stream
            .clone()
            .ok_or_else(|| DriverError::protocol("trace did not produce a stream"))?;

        let mut bytes = Vec::new();
        loop {
            let chunk = page
                .execute(ReadParams::new(handle.clone()))
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?;
            if chunk.result.base64_encoded.unwrap_or(false) {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(chunk.result.data.as_bytes())
                    .map_err(|e| DriverError::protocol(e.to_string()))?;
                bytes.extend_from_slice(&decoded);
            } else {
                bytes.extend_from_slice(chunk.result.data.as_bytes());
            }
            if chunk.result.eof {
                break;
            }
        }

        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DriverError::protocol(format!("failed to write trace file: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        let guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            browser
                .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
                .await
                .map_err(|e| DriverError::protocol(e.to_string()))?;
        }
        Ok(())
    }
}

/// Shared bookkeeping for the event pumps of one page.
#[derive(Default)]
struct PumpState {
    inflight: AtomicI64,
    last_document_status: AtomicI64,
    // request id -> (status, headers) stashed until loading finishes
    responses: StdMutex<HashMap<String, (i64, HashMap<String, String>)>>,
}

/// One page inside a CDP context.
pub struct CdpPage {
    page: Page,
    events_tx: broadcast::Sender<PageEvent>,
    state: Arc<PumpState>,
    default_timeout_ms: Arc<AtomicU64>,
    pump_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl CdpPage {
    async fn spawn(page: Page, default_timeout_ms: Arc<AtomicU64>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let state = Arc::new(PumpState::default());
        let mut pump_tasks = Vec::new();

        if let Ok(mut stream) = page.event_listener::<EventRequestWillBeSent>().await {
            let tx = events_tx.clone();
            let st = state.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    st.inflight.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(PageEvent::Request {
                        request_id: ev.request_id.inner().clone(),
                        method: ev.request.method.clone(),
                        url: ev.request.url.clone(),
                        headers: headers_to_map(serde_json::to_value(&ev.request.headers).ok()),
                        body: ev.request.post_data_entries.as_ref().and_then(|entries| {
                            entries.first().and_then(|e| {
                                e.bytes.as_ref().and_then(|b| {
                                    let encoded: &str = b.as_ref();
                                    base64::engine::general_purpose::STANDARD
                                        .decode(encoded)
                                        .ok()
                                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                                })
                            })
                        }),
                    });
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventResponseReceived>().await {
            let st = state.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    let status = ev.response.status;
                    if format!("{:?}", ev.r#type).eq_ignore_ascii_case("document") {
                        st.last_document_status.store(status, Ordering::Relaxed);
                    }
                    let headers = headers_to_map(serde_json::to_value(&ev.response.headers).ok());
                    st.responses
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(ev.request_id.inner().clone(), (status, headers));
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventLoadingFinished>().await {
            let tx = events_tx.clone();
            let st = state.clone();
            let body_page = page.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    st.inflight.fetch_sub(1, Ordering::Relaxed);
                    let key = ev.request_id.inner().clone();
                    let stashed = st
                        .responses
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(&key);
                    if let Some((status, headers)) = stashed {
                        let body = fetch_body(&body_page, ev.request_id.clone()).await;
                        let _ = tx.send(PageEvent::Response {
                            request_id: key,
                            status,
                            headers,
                            body,
                        });
                    }
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventLoadingFailed>().await {
            let tx = events_tx.clone();
            let st = state.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    st.inflight.fetch_sub(1, Ordering::Relaxed);
                    let key = ev.request_id.inner().clone();
                    st.responses
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(&key);
                    let _ = tx.send(PageEvent::RequestFailed {
                        request_id: key,
                        error: ev.error_text.clone(),
                    });
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventConsoleApiCalled>().await {
            let tx = events_tx.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    let level =
                        ConsoleLevel::from_cdp_type(&format!("{:?}", ev.r#type).to_lowercase());
                    let text = ev
                        .args
                        .iter()
                        .map(format_remote_object)
                        .collect::<Vec<_>>()
                        .join(" ");
                    let location = ev.stack_trace.as_ref().and_then(|st| {
                        st.call_frames.first().map(|f| SourceLocation {
                            url: f.url.clone(),
                            line: f.line_number.max(0) as u64,
                            column: f.column_number.max(0) as u64,
                        })
                    });
                    let _ = tx.send(PageEvent::Console {
                        level,
                        text,
                        location,
                    });
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventExceptionThrown>().await {
            let tx = events_tx.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    let details = &ev.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|obj| obj.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    let _ = tx.send(PageEvent::PageError { message });
                }
            }));
        }

        if let Ok(mut stream) = page.event_listener::<EventFrameNavigated>().await {
            let tx = events_tx.clone();
            pump_tasks.push(tokio::spawn(async move {
                while let Some(ev) = stream.next().await {
                    let _ = tx.send(PageEvent::FrameNavigated {
                        url: ev.frame.url.clone(),
                        is_main_frame: ev.frame.parent_id.is_none(),
                    });
                }
            }));
        }

        Self {
            page,
            events_tx,
            state,
            default_timeout_ms,
            pump_tasks,
        }
    }

    fn timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or_else(|| self.default_timeout_ms.load(Ordering::Relaxed))
    }

    /// Poll `find_element` until it matches or the deadline passes.
    async fn wait_for_element(
        &self,
        selector: &str,
        timeout_ms: u64,
    ) -> DriverResult<chromiumoxide::Element> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("not a valid selector") {
                        return Err(DriverError::InvalidSelector {
                            selector: selector.to_string(),
                            message,
                        });
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(DriverError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn wait_ready_state(&self, want_complete: bool, deadline: Instant) {
        loop {
            let state = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|r| r.value().and_then(|v| v.as_str().map(str::to_string)));
            let done = match state.as_deref() {
                Some("complete") => true,
                Some("interactive") => !want_complete,
                _ => false,
            };
            if done || Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Network-idle: no in-flight requests for a sustained quiet window.
    async fn wait_network_idle(&self, deadline: Instant) {
        const QUIET: Duration = Duration::from_millis(500);
        let mut quiet_since: Option<Instant> = None;
        loop {
            if self.state.inflight.load(Ordering::Relaxed) <= 0 {
                let since = *quiet_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= QUIET {
                    break;
                }
            } else {
                quiet_since = None;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        for task in &self.pump_tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn goto(&self, url: &str, params: GotoParams) -> DriverResult<NavigationResult> {
        let ms = self.timeout_ms(params.timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(ms);

        timeout(Duration::from_millis(ms), self.page.goto(url))
            .await
            .map_err(|_| DriverError::timeout("goto", ms))?
            .map_err(|e| map_navigation_error(e.to_string()))?;

        match params.wait_until {
            WaitUntil::Commit => {}
            WaitUntil::DomContentLoaded => self.wait_ready_state(false, deadline).await,
            WaitUntil::Load => self.wait_ready_state(true, deadline).await,
            WaitUntil::NetworkIdle => {
                self.wait_ready_state(true, deadline).await;
                self.wait_network_idle(deadline).await;
            }
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        let status = self.state.last_document_status.load(Ordering::Relaxed);
        Ok(NavigationResult { final_url, status })
    }

    async fn click(&self, selector: &str, params: ClickParams) -> DriverResult<()> {
        let ms = self.timeout_ms(params.timeout_ms);
        let element = if params.force {
            self.page
                .find_element(selector)
                .await
                .map_err(|_| DriverError::ElementNotFound {
                    selector: selector.to_string(),
                })?
        } else {
            self.wait_for_element(selector, ms).await?
        };

        match params.position {
            None => {
                element
                    .click()
                    .await
                    .map_err(|e| DriverError::protocol(e.to_string()))?;
            }
            Some((x, y)) => {
                // Offset clicks are dispatched in-page; CDP element clicks
                // only target the center point.
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        const r = el.getBoundingClientRect();
                        const opts = {{bubbles: true, cancelable: true,
                            clientX: r.left + {x}, clientY: r.top + {y}}};
                        el.dispatchEvent(new MouseEvent('mousedown', opts));
                        el.dispatchEvent(new MouseEvent('mouseup', opts));
                        el.dispatchEvent(new MouseEvent('click', opts));
                        return true;
                    }})()"#,
                    sel = js_string(selector),
                );
                let hit = self
                    .page
                    .evaluate(script)
                    .await
                    .map_err(|e| DriverError::protocol(e.to_string()))?
                    .value()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !hit {
                    return Err(DriverError::ElementNotFound {
                        selector: selector.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, timeout_ms: Option<u64>) -> DriverResult<()> {
        let ms = self.timeout_ms(timeout_ms);
        let element = self.wait_for_element(selector, ms).await?;
        element
            .click()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        let clear = format!(
            r#"(() => {{ const el = document.querySelector({sel});
                if (el) {{ el.value = ''; }} }})()"#,
            sel = js_string(selector),
        );
        self.page
            .evaluate(clear)
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout_ms: Option<u64>,
    ) -> DriverResult<()> {
        let ms = self.timeout_ms(timeout_ms);
        self.wait_for_element(selector, ms).await?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return 'missing';
                if (el.tagName !== 'SELECT') return 'not-select';
                const opt = Array.from(el.options).find(o => o.value === {val});
                if (!opt) return 'option-not-found';
                el.value = {val};
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                return 'ok';
            }})()"#,
            sel = js_string(selector),
            val = js_string(value),
        );
        let outcome = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?
            .value()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "missing".to_string());
        match outcome.as_str() {
            "ok" => Ok(()),
            "not-select" => Err(DriverError::NotSelectElement {
                selector: selector.to_string(),
            }),
            "option-not-found" => Err(DriverError::OptionNotFound {
                selector: selector.to_string(),
                value: value.to_string(),
            }),
            _ => Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            }),
        }
    }

    async fn evaluate(&self, code: &str) -> DriverResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(code)
            .await
            .map_err(|e| DriverError::Evaluation {
                message: e.to_string(),
            })?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self, params: ScreenshotParams) -> DriverResult<Vec<u8>> {
        let ms = params.timeout_ms.unwrap_or(30_000);
        let format = match params.format {
            ScreenshotFormat::Png => CaptureScreenshotFormat::Png,
            ScreenshotFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };

        if let Some(clip) = params.clip {
            // Region capture goes through the raw CDP command; the
            // convenience wrapper has no clip support.
            let mut builder = cdp_page::CaptureScreenshotParams::builder()
                .format(format)
                .clip(
                    cdp_page::Viewport::builder()
                        .x(clip.x)
                        .y(clip.y)
                        .width(clip.width)
                        .height(clip.height)
                        .scale(1.0)
                        .build()
                        .map_err(DriverError::protocol)?,
                );
            if let Some(q) = params.quality {
                builder = builder.quality(q);
            }
            let resp = timeout(
                Duration::from_millis(ms),
                self.page.execute(builder.build()),
            )
            .await
            .map_err(|_| DriverError::timeout("screenshot", ms))?
            .map_err(|e| DriverError::protocol(e.to_string()))?;
            let encoded: &str = resp.result.data.as_ref();
            return base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| DriverError::protocol(e.to_string()));
        }

        let mut builder = chromiumoxide::page::ScreenshotParams::builder()
            .format(format)
            .full_page(params.full_page)
            .omit_background(params.omit_background);
        if let Some(q) = params.quality {
            builder = builder.quality(q);
        }
        timeout(
            Duration::from_millis(ms),
            self.page.screenshot(builder.build()),
        )
        .await
        .map_err(|_| DriverError::timeout("screenshot", ms))?
        .map_err(|e| DriverError::protocol(e.to_string()))
    }

    async fn bounding_box(&self, selector: &str) -> DriverResult<(f64, f64, f64, f64)> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return [r.x, r.y, r.width, r.height];
            }})()"#,
            sel = js_string(selector),
        );
        let value = self.evaluate(&script).await?;
        let coords = value
            .as_array()
            .filter(|a| a.len() == 4)
            .map(|a| {
                (
                    a[0].as_f64().unwrap_or(0.0),
                    a[1].as_f64().unwrap_or(0.0),
                    a[2].as_f64().unwrap_or(0.0),
                    a[3].as_f64().unwrap_or(0.0),
                )
            })
            .ok_or_else(|| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        Ok(coords)
    }

    async fn content(&self) -> DriverResult<String> {
        self.page
            .content()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?
            .unwrap_or_default())
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events_tx.subscribe()
    }

    async fn close(&self) -> DriverResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| DriverError::protocol(e.to_string()))?;
        Ok(())
    }
}

/// Fetch a finished response body, dropping it when over the capture cap or
/// not valid text.
async fn fetch_body(page: &Page, request_id: network::RequestId) -> Option<String> {
    let resp = timeout(
        Duration::from_secs(5),
        page.execute(GetResponseBodyParams::new(request_id)),
    )
    .await
    .ok()?
    .ok()?;
    let body = if resp.result.base64_encoded {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(resp.result.body.as_bytes())
            .ok()?;
        String::from_utf8(bytes).ok()?
    } else {
        resp.result.body.clone()
    };
    if body.len() > MAX_CAPTURED_BODY_BYTES {
        return None;
    }
    Some(body)
}

fn headers_to_map(value: Option<serde_json::Value>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(serde_json::Value::Object(map)) = value {
        for (k, v) in map {
            let rendered = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            out.insert(k, rendered);
        }
    }
    out
}

fn format_remote_object(arg: &chromiumoxide::cdp::js_protocol::runtime::RemoteObject) -> String {
    if let Some(value) = &arg.value {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else if let Some(desc) = &arg.description {
        desc.clone()
    } else if let Some(unser) = &arg.unserializable_value {
        unser.inner().clone()
    } else {
        String::from("[unknown]")
    }
}

fn map_navigation_error(message: String) -> DriverError {
    if message.contains("net::ERR") || message.contains("NAME_NOT_RESOLVED") {
        DriverError::NetworkError { message }
    } else {
        DriverError::protocol(message)
    }
}

/// Quote a string for interpolation into an injected script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_error_mapping() {
        assert!(matches!(
            map_navigation_error("net::ERR_CONNECTION_REFUSED".into()),
            DriverError::NetworkError { .. }
        ));
        assert!(matches!(
            map_navigation_error("some protocol problem".into()),
            DriverError::Protocol { .. }
        ));
    }

    #[test]
    fn js_string_escapes() {
        assert_eq!(js_string("#go"), "\"#go\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn headers_map_renders_non_strings() {
        let value = serde_json::json!({"content-length": 42, "x-a": "b"});
        let map = headers_to_map(Some(value));
        assert_eq!(map.get("content-length").unwrap(), "42");
        assert_eq!(map.get("x-a").unwrap(), "b");
    }
}
