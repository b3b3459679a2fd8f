//! Sliding-window circuit breakers, one named instance per adapter-facing
//! operation class, all managed by a registry.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Operation classes guarded by default.
pub mod ops {
    pub const NAVIGATION: &str = "navigation";
    pub const INTERACTION: &str = "interaction";
    pub const EVALUATION: &str = "evaluation";
    pub const SCREENSHOT: &str = "screenshot";
    pub const SESSION_CREATE: &str = "session-create";
    pub const FILE_OP: &str = "file-op";
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure fraction at which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Sliding window over which failures are counted.
    pub window: Duration,
    /// Minimum samples in the window before the threshold applies.
    pub min_samples: usize,
    /// Open duration before a half-open probe is allowed.
    pub recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(5),
            min_samples: 3,
            recovery: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Whether a call may proceed right now. An open circuit transitions to
    /// half-open once the recovery delay has elapsed and then admits a
    /// single probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery)
                    .unwrap_or(true);
                if recovered {
                    debug!(circuit = %self.name, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            CircuitState::HalfOpen => {
                debug!(circuit = %self.name, "probe succeeded, circuit closed");
                inner.state = CircuitState::Closed;
                inner.probe_in_flight = false;
                inner.samples.clear();
                inner.opened_at = None;
            }
            _ => {
                let now = Instant::now();
                inner.samples.push_back((now, true));
                Self::trim(&mut inner.samples, now, self.config.window);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.state == CircuitState::HalfOpen {
            warn!(circuit = %self.name, "probe failed, circuit re-opened");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            return;
        }

        let now = Instant::now();
        inner.samples.push_back((now, false));
        Self::trim(&mut inner.samples, now, self.config.window);

        let total = inner.samples.len();
        if total < self.config.min_samples {
            return;
        }
        let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
        let rate = failures as f64 / total as f64;
        if inner.state == CircuitState::Closed && rate >= self.config.failure_rate_threshold {
            warn!(
                circuit = %self.name,
                failures,
                total,
                "failure rate above threshold, circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    fn trim(samples: &mut VecDeque<(Instant, bool)>, now: Instant, window: Duration) {
        while let Some((at, _)) = samples.front() {
            if now.duration_since(*at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Named breaker registry; breakers are created lazily with the shared
/// config.
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(5),
            min_samples: 3,
            recovery: Duration::from_millis(20),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("nav", fast_config());
        assert!(cb.allow());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed); // below min samples
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn stays_closed_when_mostly_successful() {
        let cb = CircuitBreaker::new("nav", fast_config());
        for _ in 0..10 {
            cb.record_success();
        }
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open_probe() {
        let cb = CircuitBreaker::new("nav", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.allow()); // probe admitted
        assert!(!cb.allow()); // only one probe at a time
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let cb = CircuitBreaker::new("nav", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn registry_reuses_instances() {
        let registry = CircuitRegistry::new(CircuitBreakerConfig::default());
        let a = registry.breaker(ops::NAVIGATION);
        let b = registry.breaker(ops::NAVIGATION);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.states().len(), 1);
    }
}
