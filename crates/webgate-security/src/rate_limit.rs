//! Fixed dual-window rate limiting per (client, operation).

use crate::error::{SecurityError, SecurityResult};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::warn;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self { count: 0, started: now }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowPair {
    minute: Window,
    hour: Window,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<(String, String), WindowPair>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check and account one call for (client, operation).
    ///
    /// The hour window is checked first, then the minute window; both
    /// counters advance only when both checks pass, so a rejected call is
    /// never charged.
    pub fn check(&self, client: &str, operation: &str) -> SecurityResult<()> {
        let now = Instant::now();
        let key = (client.to_string(), operation.to_string());
        let mut entry = self.windows.entry(key).or_insert_with(|| WindowPair {
            minute: Window::fresh(now),
            hour: Window::fresh(now),
        });

        if now.duration_since(entry.hour.started) >= HOUR {
            entry.hour = Window::fresh(now);
        }
        if entry.hour.count >= self.config.requests_per_hour {
            warn!(client = %client, operation = %operation, "hourly rate limit hit");
            return Err(SecurityError::RateLimited {
                scope: "hourly",
                limit: self.config.requests_per_hour,
            });
        }

        if now.duration_since(entry.minute.started) >= MINUTE {
            entry.minute = Window::fresh(now);
        }
        if entry.minute.count >= self.config.requests_per_minute {
            warn!(client = %client, operation = %operation, "per-minute rate limit hit");
            return Err(SecurityError::RateLimited {
                scope: "per-minute",
                limit: self.config.requests_per_minute,
            });
        }

        entry.hour.count += 1;
        entry.minute.count += 1;
        Ok(())
    }

    /// Number of tracked (client, operation) pairs.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_limit_rejects_third_call() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 2,
            requests_per_hour: 1_000,
        });
        assert!(limiter.check("client-a", "browser.goto").is_ok());
        assert!(limiter.check("client-a", "browser.goto").is_ok());
        let err = limiter.check("client-a", "browser.goto").unwrap_err();
        assert!(matches!(
            err,
            SecurityError::RateLimited {
                scope: "per-minute",
                limit: 2
            }
        ));
    }

    #[test]
    fn windows_are_per_client_and_operation() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            requests_per_hour: 1_000,
        });
        assert!(limiter.check("a", "browser.goto").is_ok());
        assert!(limiter.check("a", "browser.click").is_ok());
        assert!(limiter.check("b", "browser.goto").is_ok());
        assert!(limiter.check("a", "browser.goto").is_err());
    }

    #[test]
    fn hourly_limit_applies_before_minute() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 10,
            requests_per_hour: 1,
        });
        assert!(limiter.check("a", "op").is_ok());
        let err = limiter.check("a", "op").unwrap_err();
        assert!(matches!(err, SecurityError::RateLimited { scope: "hourly", .. }));
    }

    #[test]
    fn rejected_calls_are_not_charged() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            requests_per_hour: 2,
        });
        assert!(limiter.check("a", "op").is_ok());
        // Minute-limited, must not consume hourly budget.
        assert!(limiter.check("a", "op").is_err());
        assert!(limiter.check("a", "op").is_err());
    }
}
