//! Session lifecycle: the pool that owns every session, the warm context
//! pool underneath it, and the per-session event capture pipeline.

pub mod capture;
pub mod config;
pub mod context_pool;
pub mod error;
pub mod pool;
pub mod records;
pub mod session;

pub use capture::ConsoleBroadcast;
pub use config::{ContextPoolConfig, SessionPoolConfig};
pub use context_pool::ContextPool;
pub use error::{SessionError, SessionResult};
pub use pool::{PoolStats, SessionPool};
pub use records::{ConsoleRecord, NetworkRecord, RingBuffer, TraceRecord, LOG_CAP};
pub use session::{Session, SessionOptions};
