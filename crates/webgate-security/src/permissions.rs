//! Pending-permission broker.
//!
//! A navigation to an unlisted domain parks the caller on a broadcast
//! channel keyed by (domain, session). Further callers for the same key
//! attach to the same channel, so one decision fans out to everyone.
//! Without an attached decider the request is conservatively auto-denied
//! after a short delay; with or without one it expires hard after the
//! configured timeout.

use crate::error::{SecurityError, SecurityResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PermissionBrokerConfig {
    /// Hard expiry for an undecided request.
    pub hard_timeout_ms: u64,
    /// Conservative auto-deny when no decider is attached; 0 disables.
    pub soft_deny_ms: u64,
}

impl Default for PermissionBrokerConfig {
    fn default() -> Self {
        Self {
            hard_timeout_ms: 30_000,
            soft_deny_ms: 1_000,
        }
    }
}

type Key = (String, String);

pub struct PermissionBroker {
    config: PermissionBrokerConfig,
    pending: Arc<DashMap<Key, broadcast::Sender<bool>>>,
    decider_attached: AtomicBool,
}

impl PermissionBroker {
    pub fn new(config: PermissionBrokerConfig) -> Self {
        Self {
            config,
            pending: Arc::new(DashMap::new()),
            decider_attached: AtomicBool::new(false),
        }
    }

    /// Mark that an external decider (UI, IDE extension) is listening;
    /// disables the soft auto-deny.
    pub fn attach_decider(&self) {
        self.decider_attached.store(true, Ordering::SeqCst);
    }

    pub fn detach_decider(&self) {
        self.decider_attached.store(false, Ordering::SeqCst);
    }

    /// Keys currently awaiting a decision.
    pub fn pending_requests(&self) -> Vec<(String, String)> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Await permission for `domain` on behalf of `session_id`.
    ///
    /// Coalesces with any in-flight request for the same key. Resolves with
    /// the decision, `Ok(false)` on auto-deny, or `PermissionTimeout` at
    /// hard expiry.
    pub async fn request_permission(
        &self,
        domain: &str,
        session_id: &str,
    ) -> SecurityResult<bool> {
        let key = (domain.to_string(), session_id.to_string());

        let (mut rx, newly_created) = {
            match self.pending.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => {
                    (entry.get().subscribe(), false)
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let (tx, rx) = broadcast::channel(1);
                    entry.insert(tx);
                    (rx, true)
                }
            }
        };

        if newly_created {
            debug!(domain = %domain, session_id = %session_id, "permission request pending");
            if self.config.soft_deny_ms > 0 && !self.decider_attached.load(Ordering::SeqCst) {
                let pending = self.pending.clone();
                let key = key.clone();
                let delay = Duration::from_millis(self.config.soft_deny_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some((_, tx)) = pending.remove(&key) {
                        debug!(domain = %key.0, "permission request auto-denied");
                        let _ = tx.send(false);
                    }
                });
            }
        }

        match timeout(
            Duration::from_millis(self.config.hard_timeout_ms),
            rx.recv(),
        )
        .await
        {
            Ok(Ok(granted)) => Ok(granted),
            Ok(Err(_)) => {
                // Sender dropped without a decision.
                Ok(false)
            }
            Err(_) => {
                self.pending.remove(&key);
                warn!(domain = %domain, session_id = %session_id, "permission request expired");
                Err(SecurityError::PermissionTimeout {
                    domain: domain.to_string(),
                })
            }
        }
    }

    /// Resolve a pending request. Returns false when nothing was pending
    /// for the key.
    pub fn respond(&self, domain: &str, session_id: &str, granted: bool) -> bool {
        let key = (domain.to_string(), session_id.to_string());
        if let Some((_, tx)) = self.pending.remove(&key) {
            debug!(domain = %domain, session_id = %session_id, granted, "permission request resolved");
            let _ = tx.send(granted);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(soft_deny_ms: u64, hard_timeout_ms: u64) -> Arc<PermissionBroker> {
        Arc::new(PermissionBroker::new(PermissionBrokerConfig {
            hard_timeout_ms,
            soft_deny_ms,
        }))
    }

    #[tokio::test]
    async fn grant_resolves_waiter() {
        let broker = broker(0, 5_000);
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_permission("example.com", "s1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.respond("example.com", "s1", true));
        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn two_waiters_one_decision() {
        let broker = broker(0, 5_000);
        let a = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_permission("example.com", "s1").await })
        };
        let b = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request_permission("example.com", "s1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.pending_requests().len(), 1);
        broker.respond("example.com", "s1", false);
        assert!(!a.await.unwrap().unwrap());
        assert!(!b.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn soft_auto_deny_fires_without_decider() {
        let broker = broker(50, 5_000);
        let granted = broker.request_permission("example.com", "s1").await.unwrap();
        assert!(!granted);
        assert!(broker.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn attached_decider_suppresses_soft_deny() {
        let broker = broker(50, 300);
        broker.attach_decider();
        // No decision ever arrives: the request must run into the hard
        // expiry instead of the soft deny.
        let result = broker.request_permission("example.com", "s1").await;
        assert!(matches!(
            result,
            Err(SecurityError::PermissionTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn respond_without_pending_is_noop() {
        let broker = broker(0, 1_000);
        assert!(!broker.respond("example.com", "s1", true));
    }
}
