//! Process-level resource caps, the throttled execution queue and the
//! temp-artifact store.

use crate::circuit::{CircuitBreakerConfig, CircuitRegistry};
use crate::error::{PerformanceError, PerformanceResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Hard cap on process memory (MB).
    pub max_memory_mb: u64,
    /// Cap on temp artifacts on disk (MB).
    pub max_disk_mb: u64,
    /// Concurrent evaluate-class operations.
    pub max_concurrent_heavy_ops: usize,
    /// Directory for temp artifacts; defaults to a subdirectory of the
    /// system temp dir.
    pub temp_dir: Option<PathBuf>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 2_048,
            max_disk_mb: 1_024,
            max_concurrent_heavy_ops: 4,
            temp_dir: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Memory pressure signal consumed by the session pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pressure {
    None,
    Warn,
    Critical,
}

/// Permit for one evaluate-class operation; released on drop.
pub struct HeavyOpPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub memory_usage_mb: u64,
    pub max_memory_mb: u64,
    pub pressure: Pressure,
    pub temp_disk_usage_mb: u64,
    pub available_heavy_op_slots: usize,
}

pub struct PerformanceManager {
    config: PerformanceConfig,
    throttle: Arc<Semaphore>,
    system: Mutex<System>,
    pid: Pid,
    temp_dir: PathBuf,
    circuits: CircuitRegistry,
}

impl PerformanceManager {
    pub async fn new(config: PerformanceConfig) -> PerformanceResult<Self> {
        let temp_dir = config
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("webgate"));
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| PerformanceError::TempStore {
                message: format!("failed to create temp dir {temp_dir:?}: {e}"),
            })?;

        let pid = sysinfo::get_current_pid().map_err(|e| PerformanceError::TempStore {
            message: format!("failed to resolve own pid: {e}"),
        })?;

        info!(
            max_memory_mb = config.max_memory_mb,
            max_disk_mb = config.max_disk_mb,
            heavy_ops = config.max_concurrent_heavy_ops,
            "performance manager initialised"
        );

        Ok(Self {
            throttle: Arc::new(Semaphore::new(config.max_concurrent_heavy_ops)),
            system: Mutex::new(System::new()),
            pid,
            temp_dir,
            circuits: CircuitRegistry::new(config.circuit_breaker.clone()),
            config,
        })
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Queue admission for an evaluate-class operation.
    pub async fn acquire_heavy_op(&self) -> HeavyOpPermit {
        let permit = self
            .throttle
            .clone()
            .acquire_owned()
            .await
            .expect("throttle semaphore is never closed");
        HeavyOpPermit { _permit: permit }
    }

    /// Current process RSS in MB.
    pub async fn memory_usage_mb(&self) -> u64 {
        let mut system = self.system.lock().await;
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system
            .process(self.pid)
            .map(|p| p.memory() / (1024 * 1024))
            .unwrap_or(0)
    }

    pub async fn pressure(&self) -> Pressure {
        let used = self.memory_usage_mb().await;
        let limit = self.config.max_memory_mb;
        if used >= limit * 95 / 100 {
            Pressure::Critical
        } else if used >= limit * 80 / 100 {
            Pressure::Warn
        } else {
            Pressure::None
        }
    }

    /// Session-pool veto: refuses new sessions under critical pressure.
    pub async fn can_create_session(&self) -> PerformanceResult<()> {
        if self.pressure().await == Pressure::Critical {
            let current = self.memory_usage_mb().await;
            warn!(current_mb = current, "refusing session under memory pressure");
            return Err(PerformanceError::ResourceExhausted {
                resource: "memory",
                current,
                limit: self.config.max_memory_mb,
            });
        }
        Ok(())
    }

    pub async fn stats(&self) -> PerformanceStats {
        PerformanceStats {
            memory_usage_mb: self.memory_usage_mb().await,
            max_memory_mb: self.config.max_memory_mb,
            pressure: self.pressure().await,
            temp_disk_usage_mb: self.temp_disk_usage().await.unwrap_or(0) / (1024 * 1024),
            available_heavy_op_slots: self.throttle.available_permits(),
        }
    }

    /// Store a temp artifact, enforcing the disk budget.
    pub async fn store_temporary(&self, name: &str, bytes: &[u8]) -> PerformanceResult<PathBuf> {
        let used = self.temp_disk_usage().await?;
        let limit = self.config.max_disk_mb * 1024 * 1024;
        if used + bytes.len() as u64 > limit {
            return Err(PerformanceError::ResourceExhausted {
                resource: "disk",
                current: used / (1024 * 1024),
                limit: self.config.max_disk_mb,
            });
        }
        let path = self.temp_dir.join(sanitize_name(name));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PerformanceError::TempStore {
                message: format!("failed to write {path:?}: {e}"),
            })?;
        debug!(path = ?path, bytes = bytes.len(), "temp artifact stored");
        Ok(path)
    }

    pub async fn get_temporary(&self, name: &str) -> PerformanceResult<Option<Vec<u8>>> {
        let path = self.temp_dir.join(sanitize_name(name));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PerformanceError::TempStore {
                message: format!("failed to read {path:?}: {e}"),
            }),
        }
    }

    /// Delete temp artifacts older than `older_than_ms`. Returns the number
    /// removed.
    pub async fn force_cleanup(&self, older_than_ms: u64) -> PerformanceResult<usize> {
        let cutoff = Duration::from_millis(older_than_ms);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.temp_dir)
            .await
            .map_err(|e| PerformanceError::TempStore {
                message: format!("failed to list temp dir: {e}"),
            })?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok());
            if age.map(|a| a >= cutoff).unwrap_or(false) {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "temp artifacts cleaned up");
        }
        Ok(removed)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    async fn temp_disk_usage(&self) -> PerformanceResult<u64> {
        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(&self.temp_dir)
            .await
            .map_err(|e| PerformanceError::TempStore {
                message: format!("failed to list temp dir: {e}"),
            })?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_in(dir: &Path, max_disk_mb: u64) -> PerformanceManager {
        PerformanceManager::new(PerformanceConfig {
            max_disk_mb,
            temp_dir: Some(dir.to_path_buf()),
            ..PerformanceConfig::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn temp_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), 1).await;

        manager.store_temporary("a.bin", b"hello").await.unwrap();
        assert_eq!(
            manager.get_temporary("a.bin").await.unwrap().unwrap(),
            b"hello"
        );
        assert!(manager.get_temporary("missing.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), 1).await; // 1 MB budget

        let big = vec![0u8; 700 * 1024];
        manager.store_temporary("a.bin", &big).await.unwrap();
        let err = manager.store_temporary("b.bin", &big).await.unwrap_err();
        assert!(matches!(
            err,
            PerformanceError::ResourceExhausted {
                resource: "disk",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn force_cleanup_removes_everything_with_zero_age() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), 10).await;
        manager.store_temporary("a.bin", b"x").await.unwrap();
        manager.store_temporary("b.bin", b"y").await.unwrap();

        let removed = manager.force_cleanup(0).await.unwrap();
        assert_eq!(removed, 2);
        assert!(manager.get_temporary("a.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heavy_op_queue_limits_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(
            PerformanceManager::new(PerformanceConfig {
                max_concurrent_heavy_ops: 1,
                temp_dir: Some(dir.path().to_path_buf()),
                ..PerformanceConfig::default()
            })
            .await
            .unwrap(),
        );

        let first = manager.acquire_heavy_op().await;
        let second = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.acquire_heavy_op().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        drop(first);
        second.await.unwrap();
    }

    #[test]
    fn name_sanitisation() {
        assert_eq!(sanitize_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_name("trace-1.json"), "trace-1.json");
    }
}
