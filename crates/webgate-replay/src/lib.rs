//! Macro recording and playback: capture user interactions bound to a
//! session, persist them through a pluggable storage capability, and drive
//! them against another session.

pub mod error;
pub mod model;
pub mod player;
pub mod recorder;
pub mod storage;

pub use error::{ReplayError, ReplayResult};
pub use model::{
    MacroAction, MacroActionKind, MacroMetadata, MacroRecording, MacroSummary, PlaybackError,
    PlaybackOptions, PlaybackResult,
};
pub use player::MacroPlayer;
pub use recorder::MacroRecorder;
pub use storage::{FileStorage, MacroStorage, MemoryStorage};
