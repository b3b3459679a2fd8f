use webgate_driver::Viewport;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub max_sessions: usize,
    /// Idle time after which a session is reaped.
    pub session_timeout_ms: u64,
    /// Reaper scan interval.
    pub cleanup_interval_ms: u64,
    pub default_viewport: Viewport,
    pub default_user_agent: String,
    pub default_timeout_ms: u64,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            session_timeout_ms: 1_800_000,
            cleanup_interval_ms: 300_000,
            default_viewport: Viewport::default(),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextPoolConfig {
    pub enabled: bool,
    /// Warm contexts kept ready.
    pub min: usize,
    /// Pooled contexts at most; beyond this, acquisition falls through to
    /// fresh creation.
    pub max: usize,
    pub warmup_on_start: bool,
    pub max_idle_ms: u64,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min: 1,
            max: 5,
            warmup_on_start: false,
            max_idle_ms: 300_000,
        }
    }
}
