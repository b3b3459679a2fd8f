//! Component facade wiring the allow-list, permission broker, rate limiter,
//! redactor and eval policy behind one handle.

use crate::allowlist::{is_allowed, normalize_host};
use crate::error::{SecurityError, SecurityResult};
use crate::eval_policy::{EvalPolicy, DEFAULT_DENIED_PATTERNS};
use crate::permissions::{PermissionBroker, PermissionBrokerConfig};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::redaction::{Redactor, DEFAULT_SENSITIVE_HEADERS};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_domains: Vec<String>,
    pub auto_approve_localhost: bool,
    pub rate_limits: RateLimitConfig,
    pub sensitive_headers: Vec<String>,
    pub permissions: PermissionBrokerConfig,
    pub eval_denied_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            auto_approve_localhost: true,
            rate_limits: RateLimitConfig::default(),
            sensitive_headers: DEFAULT_SENSITIVE_HEADERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            permissions: PermissionBrokerConfig::default(),
            eval_denied_patterns: DEFAULT_DENIED_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

pub struct SecurityManager {
    global_allow: HashSet<String>,
    auto_approve_localhost: bool,
    broker: PermissionBroker,
    limiter: RateLimiter,
    redactor: Redactor,
    eval_policy: EvalPolicy,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        let global_allow = config
            .allowed_domains
            .iter()
            .map(|d| normalize_host(d))
            .collect();
        Self {
            global_allow,
            auto_approve_localhost: config.auto_approve_localhost,
            broker: PermissionBroker::new(config.permissions),
            limiter: RateLimiter::new(config.rate_limits),
            redactor: Redactor::new(config.sensitive_headers),
            eval_policy: EvalPolicy::new(config.eval_denied_patterns),
        }
    }

    /// Decide whether `session_id` may touch `domain`.
    ///
    /// Allowed immediately when the normalised host is in the session's
    /// allow-list or the global one; otherwise the call parks on the
    /// permission broker until a decision, auto-deny, or expiry.
    pub async fn check_domain_access(
        &self,
        domain: &str,
        session_id: &str,
        session_allow: &HashSet<String>,
    ) -> SecurityResult<bool> {
        let host = normalize_host(domain);
        if is_allowed(&host, session_allow, self.auto_approve_localhost)
            || is_allowed(&host, &self.global_allow, self.auto_approve_localhost)
        {
            return Ok(true);
        }
        debug!(domain = %host, session_id = %session_id, "domain not allowed, prompting");
        self.broker.request_permission(&host, session_id).await
    }

    /// Check and account a rate-limited call.
    pub fn check_rate(&self, client: &str, operation: &str) -> SecurityResult<()> {
        self.limiter.check(client, operation)
    }

    /// Run a script through the policy filter.
    pub fn check_script(&self, code: &str) -> SecurityResult<()> {
        self.eval_policy.check(code)
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn permissions(&self) -> &PermissionBroker {
        &self.broker
    }

    /// Reject with `DomainDenied` unless access was granted.
    pub async fn require_domain_access(
        &self,
        domain: &str,
        session_id: &str,
        session_allow: &HashSet<String>,
    ) -> SecurityResult<()> {
        if self
            .check_domain_access(domain, session_id, session_allow)
            .await?
        {
            Ok(())
        } else {
            Err(SecurityError::DomainDenied {
                domain: normalize_host(domain),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(allowed: &[&str], auto_localhost: bool) -> SecurityManager {
        SecurityManager::new(SecurityConfig {
            allowed_domains: allowed.iter().map(|s| s.to_string()).collect(),
            auto_approve_localhost: auto_localhost,
            permissions: PermissionBrokerConfig {
                hard_timeout_ms: 200,
                soft_deny_ms: 20,
            },
            ..SecurityConfig::default()
        })
    }

    #[tokio::test]
    async fn configured_domains_pass_immediately() {
        let m = manager(&["example.com"], false);
        let none = HashSet::new();
        assert!(m
            .check_domain_access("https://example.com/page", "s1", &none)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn session_allowlist_is_consulted() {
        let m = manager(&[], false);
        let mut session_allow = HashSet::new();
        session_allow.insert("example.com".to_string());
        assert!(m
            .check_domain_access("example.com", "s1", &session_allow)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_domain_is_auto_denied() {
        let m = manager(&["example.com"], false);
        let none = HashSet::new();
        let granted = m
            .check_domain_access("https://google.com", "s1", &none)
            .await
            .unwrap();
        assert!(!granted);
        let err = m
            .require_domain_access("https://google.com", "s1", &none)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::DomainDenied { .. }));
    }

    #[tokio::test]
    async fn localhost_auto_approval_is_switchable() {
        let none = HashSet::new();
        let open = manager(&[], true);
        assert!(open
            .check_domain_access("http://localhost:3000", "s1", &none)
            .await
            .unwrap());

        let strict = manager(&[], false);
        assert!(!strict
            .check_domain_access("http://localhost:3000", "s1", &none)
            .await
            .unwrap());
    }
}
