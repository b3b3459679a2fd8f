//! Narrow capability surface over the headless-browser library.
//!
//! Everything above this crate talks to the browser through the
//! [`BrowserDriver`] / [`ContextHandle`] / [`PageHandle`] traits; the
//! chromiumoxide-backed engine lives in [`cdp`], and a scriptable in-memory
//! engine for tests lives in [`mock`].

pub mod cdp;
pub mod error;
pub mod events;
pub mod params;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{DriverError, DriverResult};
pub use events::{ConsoleLevel, PageEvent, SourceLocation, MAX_CAPTURED_BODY_BYTES};
pub use params::{
    ClickParams, ContextParams, GotoParams, NavigationResult, ScreenshotClip, ScreenshotFormat,
    ScreenshotParams, TraceOptions, Viewport, WaitUntil,
};
pub use traits::{BrowserDriver, ContextHandle, PageHandle};
