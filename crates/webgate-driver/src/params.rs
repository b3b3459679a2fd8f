//! Parameter and result types shared by every engine.

use serde::{Deserialize, Serialize};

/// Page viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Options for creating an isolated browser context.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub ignore_tls_errors: bool,
    pub bypass_csp: bool,
    pub default_timeout_ms: u64,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            user_agent: None,
            ignore_tls_errors: false,
            bypass_csp: false,
            default_timeout_ms: 30_000,
        }
    }
}

/// Navigation lifecycle event to wait for after `goto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
    Commit,
}

impl WaitUntil {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "load" => Some(Self::Load),
            "domcontentloaded" => Some(Self::DomContentLoaded),
            "networkidle" => Some(Self::NetworkIdle),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GotoParams {
    pub wait_until: WaitUntil,
    pub timeout_ms: Option<u64>,
}

impl Default for GotoParams {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::Load,
            timeout_ms: None,
        }
    }
}

/// Outcome of a navigation: where we ended up and the document status.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub final_url: String,
    pub status: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ClickParams {
    /// Click at an offset within the element instead of its center.
    pub position: Option<(f64, f64)>,
    /// Skip the visibility wait.
    pub force: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Png,
    Jpeg,
}

impl ScreenshotFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Capture region in page coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenshotClip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct ScreenshotParams {
    pub format: ScreenshotFormat,
    pub full_page: bool,
    pub clip: Option<ScreenshotClip>,
    pub omit_background: bool,
    /// JPEG quality 0-100; ignored for PNG.
    pub quality: Option<i64>,
    pub timeout_ms: Option<u64>,
}

impl Default for ScreenshotParams {
    fn default() -> Self {
        Self {
            format: ScreenshotFormat::Png,
            full_page: false,
            clip: None,
            omit_background: false,
            quality: None,
            timeout_ms: None,
        }
    }
}

/// Tracing capture flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TraceOptions {
    pub screenshots: bool,
    pub snapshots: bool,
    pub sources: bool,
}
