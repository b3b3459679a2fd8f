//! Macro persistence capability.

use crate::error::{ReplayError, ReplayResult};
use crate::model::{MacroRecording, MacroSummary};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use tracing::warn;

#[async_trait]
pub trait MacroStorage: Send + Sync {
    async fn save(&self, recording: MacroRecording) -> ReplayResult<()>;
    async fn get(&self, id: &str) -> ReplayResult<Option<MacroRecording>>;
    async fn list(&self) -> ReplayResult<Vec<MacroSummary>>;
    async fn delete(&self, id: &str) -> ReplayResult<bool>;
    async fn update(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> ReplayResult<bool>;
}

/// Default storage: macros live for the lifetime of the gateway.
#[derive(Default)]
pub struct MemoryStorage {
    recordings: DashMap<String, MacroRecording>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MacroStorage for MemoryStorage {
    async fn save(&self, recording: MacroRecording) -> ReplayResult<()> {
        self.recordings.insert(recording.id.clone(), recording);
        Ok(())
    }

    async fn get(&self, id: &str) -> ReplayResult<Option<MacroRecording>> {
        Ok(self.recordings.get(id).map(|r| r.clone()))
    }

    async fn list(&self) -> ReplayResult<Vec<MacroSummary>> {
        let mut summaries: Vec<MacroSummary> = self
            .recordings
            .iter()
            .map(|entry| MacroSummary::from(entry.value()))
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> ReplayResult<bool> {
        Ok(self.recordings.remove(id).is_some())
    }

    async fn update(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> ReplayResult<bool> {
        match self.recordings.get_mut(id) {
            Some(mut recording) => {
                if let Some(name) = name {
                    recording.name = name;
                }
                if let Some(description) = description {
                    recording.metadata.description = Some(description);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// JSON-file-per-macro storage for hosts that want macros to survive a
/// restart.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub async fn new(dir: impl Into<PathBuf>) -> ReplayResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ReplayError::storage(format!("failed to create {dir:?}: {e}")))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl MacroStorage for FileStorage {
    async fn save(&self, recording: MacroRecording) -> ReplayResult<()> {
        let path = self.path_for(&recording.id);
        let json = serde_json::to_vec_pretty(&recording)
            .map_err(|e| ReplayError::storage(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ReplayError::storage(format!("failed to write {path:?}: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> ReplayResult<Option<MacroRecording>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let recording = serde_json::from_slice(&bytes)
                    .map_err(|e| ReplayError::storage(format!("corrupt macro {id}: {e}")))?;
                Ok(Some(recording))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ReplayError::storage(format!(
                "failed to read {path:?}: {e}"
            ))),
        }
    }

    async fn list(&self) -> ReplayResult<Vec<MacroSummary>> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ReplayError::storage(format!("failed to list macros: {e}")))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match tokio::fs::read(entry.path()).await {
                Ok(bytes) => match serde_json::from_slice::<MacroRecording>(&bytes) {
                    Ok(recording) => summaries.push(MacroSummary::from(&recording)),
                    Err(e) => warn!(path = ?entry.path(), error = %e, "skipping corrupt macro file"),
                },
                Err(e) => warn!(path = ?entry.path(), error = %e, "skipping unreadable macro file"),
            }
        }
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> ReplayResult<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ReplayError::storage(e.to_string())),
        }
    }

    async fn update(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> ReplayResult<bool> {
        match self.get(id).await? {
            Some(mut recording) => {
                if let Some(name) = name {
                    recording.name = name;
                }
                if let Some(description) = description {
                    recording.metadata.description = Some(description);
                }
                self.save(recording).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MacroAction, MacroActionKind, MacroMetadata};
    use chrono::Utc;

    fn recording(id: &str, name: &str) -> MacroRecording {
        MacroRecording {
            id: id.into(),
            name: name.into(),
            session_id: "sess-1-0".into(),
            started_at: Utc::now(),
            ended_at: None,
            actions: vec![MacroAction::new(MacroActionKind::Navigation {
                url: "https://example.com".into(),
            })],
            metadata: MacroMetadata::default(),
        }
    }

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        storage.save(recording("m1", "first")).await.unwrap();

        let loaded = storage.get("m1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "first");
        assert_eq!(storage.list().await.unwrap().len(), 1);

        assert!(storage
            .update("m1", Some("renamed".into()), None)
            .await
            .unwrap());
        assert_eq!(storage.get("m1").await.unwrap().unwrap().name, "renamed");

        assert!(storage.delete("m1").await.unwrap());
        assert!(!storage.delete("m1").await.unwrap());
        assert!(storage.get("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        storage.save(recording("m1", "first")).await.unwrap();
        storage.save(recording("m2", "second")).await.unwrap();

        let loaded = storage.get("m1").await.unwrap().unwrap();
        assert_eq!(loaded.actions.len(), 1);
        assert_eq!(storage.list().await.unwrap().len(), 2);

        assert!(storage
            .update("m2", None, Some("notes".into()))
            .await
            .unwrap());
        let m2 = storage.get("m2").await.unwrap().unwrap();
        assert_eq!(m2.metadata.description.as_deref(), Some("notes"));

        assert!(storage.delete("m1").await.unwrap());
        assert!(storage.get("m1").await.unwrap().is_none());
    }
}
