//! Effective gateway configuration.

use serde::Deserialize;
use std::path::PathBuf;
use webgate_driver::Viewport;
use webgate_performance::{CircuitBreakerConfig, PerformanceConfig};
use webgate_security::{
    PermissionBrokerConfig, RateLimitConfig, SecurityConfig,
};
use webgate_session::{ContextPoolConfig, SessionPoolConfig};

fn default_max_sessions() -> usize {
    10
}
fn default_session_timeout_ms() -> u64 {
    1_800_000
}
fn default_cleanup_interval_ms() -> u64 {
    300_000
}
fn default_viewport_width() -> u32 {
    1280
}
fn default_viewport_height() -> u32 {
    720
}
fn default_user_agent() -> String {
    webgate_session::config::DEFAULT_USER_AGENT.to_string()
}
fn default_true() -> bool {
    true
}
fn default_permission_timeout_ms() -> u64 {
    30_000
}
fn default_permission_soft_deny_ms() -> u64 {
    1_000
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_requests_per_hour() -> u32 {
    1_000
}
fn default_socket_port() -> u16 {
    3_000
}
fn default_pool_min() -> usize {
    1
}
fn default_pool_max() -> usize {
    5
}
fn default_pool_max_idle_ms() -> u64 {
    300_000
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_memory_mb() -> u64 {
    2_048
}
fn default_max_disk_mb() -> u64 {
    1_024
}
fn default_sensitive_headers() -> Vec<String> {
    webgate_security::redaction::DEFAULT_SENSITIVE_HEADERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_eval_denied_patterns() -> Vec<String> {
    webgate_security::eval_policy::DEFAULT_DENIED_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextPoolSettings {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
    pub warmup_on_start: bool,
    pub max_idle_ms: u64,
}

impl Default for ContextPoolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min: default_pool_min(),
            max: default_pool_max(),
            warmup_on_start: false,
            max_idle_ms: default_pool_max_idle_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_viewport_width")]
    pub default_viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub default_viewport_height: u32,
    #[serde(default = "default_user_agent")]
    pub default_user_agent: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_approve_localhost: bool,
    #[serde(default = "default_permission_timeout_ms")]
    pub user_permission_timeout_ms: u64,
    #[serde(default = "default_permission_soft_deny_ms")]
    pub permission_soft_deny_ms: u64,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default = "default_sensitive_headers")]
    pub sensitive_headers: Vec<String>,
    #[serde(default = "default_eval_denied_patterns")]
    pub eval_denied_patterns: Vec<String>,
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
    #[serde(default = "default_true")]
    pub enable_socket: bool,
    #[serde(default = "default_true")]
    pub enable_stdio: bool,
    #[serde(default)]
    pub context_pool: ContextPoolSettings,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_heavy_ops: usize,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_disk_mb")]
    pub max_disk_mb: u64,
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
    #[serde(default)]
    pub trace_dir: Option<PathBuf>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserialises to defaults")
    }
}

impl GatewayConfig {
    pub fn default_viewport(&self) -> Viewport {
        Viewport {
            width: self.default_viewport_width,
            height: self.default_viewport_height,
        }
    }

    pub fn session_pool(&self) -> SessionPoolConfig {
        SessionPoolConfig {
            max_sessions: self.max_sessions,
            session_timeout_ms: self.session_timeout_ms,
            cleanup_interval_ms: self.cleanup_interval_ms,
            default_viewport: self.default_viewport(),
            default_user_agent: self.default_user_agent.clone(),
            default_timeout_ms: 30_000,
        }
    }

    pub fn context_pool_config(&self) -> ContextPoolConfig {
        ContextPoolConfig {
            enabled: self.context_pool.enabled,
            min: self.context_pool.min,
            max: self.context_pool.max,
            warmup_on_start: self.context_pool.warmup_on_start,
            max_idle_ms: self.context_pool.max_idle_ms,
        }
    }

    pub fn security(&self) -> SecurityConfig {
        SecurityConfig {
            allowed_domains: self.allowed_domains.clone(),
            auto_approve_localhost: self.auto_approve_localhost,
            rate_limits: RateLimitConfig {
                requests_per_minute: self.rate_limits.requests_per_minute,
                requests_per_hour: self.rate_limits.requests_per_hour,
            },
            sensitive_headers: self.sensitive_headers.clone(),
            permissions: PermissionBrokerConfig {
                hard_timeout_ms: self.user_permission_timeout_ms,
                soft_deny_ms: self.permission_soft_deny_ms,
            },
            eval_denied_patterns: self.eval_denied_patterns.clone(),
        }
    }

    pub fn performance(&self) -> PerformanceConfig {
        PerformanceConfig {
            max_memory_mb: self.max_memory_mb,
            max_disk_mb: self.max_disk_mb,
            max_concurrent_heavy_ops: self.max_concurrent_heavy_ops,
            temp_dir: self.temp_dir.clone(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("webgate-reports"))
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.trace_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("webgate-traces"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.session_timeout_ms, 1_800_000);
        assert_eq!(config.cleanup_interval_ms, 300_000);
        assert_eq!(config.default_viewport_width, 1280);
        assert_eq!(config.default_viewport_height, 720);
        assert_eq!(config.rate_limits.requests_per_minute, 60);
        assert_eq!(config.rate_limits.requests_per_hour, 1_000);
        assert_eq!(config.user_permission_timeout_ms, 30_000);
        assert_eq!(config.socket_port, 3_000);
        assert!(config.enable_socket);
        assert!(config.enable_stdio);
        assert!(config.auto_approve_localhost);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"maxSessions": 3, "rateLimits": {"requestsPerMinute": 2}, "enableSocket": false}"#,
        )
        .unwrap();
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.rate_limits.requests_per_minute, 2);
        assert_eq!(config.rate_limits.requests_per_hour, 1_000);
        assert!(!config.enable_socket);
        assert_eq!(config.session_timeout_ms, 1_800_000);
    }
}
