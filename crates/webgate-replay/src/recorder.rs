//! Macro recorder: one active recording per session.
//!
//! Navigations are captured automatically off the page's main-frame
//! events; everything else is recorded explicitly by the tool handlers
//! after the underlying operation succeeded.

use crate::error::{ReplayError, ReplayResult};
use crate::model::{MacroAction, MacroActionKind, MacroMetadata, MacroRecording};
use crate::storage::MacroStorage;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webgate_driver::PageEvent;
use webgate_session::Session;

struct ActiveRecording {
    recording: Arc<Mutex<MacroRecording>>,
    nav_task: JoinHandle<()>,
}

pub struct MacroRecorder {
    storage: Arc<dyn MacroStorage>,
    active: DashMap<String, ActiveRecording>,
}

impl MacroRecorder {
    pub fn new(storage: Arc<dyn MacroStorage>) -> Self {
        Self {
            storage,
            active: DashMap::new(),
        }
    }

    /// Begin recording on `session`. Fails if one is already running there.
    pub fn start(
        &self,
        session: &Arc<Session>,
        name: &str,
        description: Option<String>,
    ) -> ReplayResult<String> {
        if self.active.contains_key(session.id()) {
            return Err(ReplayError::RecordingActive {
                session_id: session.id().to_string(),
            });
        }

        let macro_id = format!("macro-{}", uuid::Uuid::new_v4());
        let recording = Arc::new(Mutex::new(MacroRecording {
            id: macro_id.clone(),
            name: name.to_string(),
            session_id: session.id().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            actions: Vec::new(),
            metadata: MacroMetadata {
                start_url: None,
                user_agent: session.options().user_agent.clone(),
                viewport: Some(session.options().viewport),
                description,
            },
        }));

        let mut events = session.page()?.events();
        let nav_recording = recording.clone();
        let session_id = session.id().to_string();
        let nav_task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let PageEvent::FrameNavigated {
                    url,
                    is_main_frame: true,
                } = event
                {
                    if url == "about:blank" {
                        continue;
                    }
                    let mut rec = nav_recording.lock().unwrap_or_else(|p| p.into_inner());
                    if rec.metadata.start_url.is_none() {
                        rec.metadata.start_url = Some(url.clone());
                    }
                    debug!(session_id = %session_id, url = %url, "navigation recorded");
                    rec.actions
                        .push(MacroAction::new(MacroActionKind::Navigation { url }));
                }
            }
        });

        info!(session_id = %session.id(), macro_id = %macro_id, name = %name, "recording started");
        self.active.insert(
            session.id().to_string(),
            ActiveRecording {
                recording,
                nav_task,
            },
        );
        Ok(macro_id)
    }

    /// Finish the session's recording, persist it, and hand it back.
    pub async fn stop(&self, session_id: &str) -> ReplayResult<MacroRecording> {
        let (_, active) =
            self.active
                .remove(session_id)
                .ok_or_else(|| ReplayError::NoActiveRecording {
                    session_id: session_id.to_string(),
                })?;
        active.nav_task.abort();

        let mut recording = active
            .recording
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        recording.ended_at = Some(Utc::now());
        self.storage.save(recording.clone()).await?;

        info!(
            session_id = %session_id,
            macro_id = %recording.id,
            actions = recording.actions.len(),
            "recording stopped"
        );
        Ok(recording)
    }

    pub fn is_recording(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    pub fn record_click(&self, session_id: &str, selector: &str, position: Option<(f64, f64)>) {
        self.push(
            session_id,
            MacroActionKind::Click {
                selector: selector.to_string(),
                position,
            },
        );
    }

    pub fn record_type(&self, session_id: &str, selector: &str, text: &str) {
        self.push(
            session_id,
            MacroActionKind::Type {
                selector: selector.to_string(),
                text: text.to_string(),
            },
        );
    }

    pub fn record_select(&self, session_id: &str, selector: &str, value: &str) {
        self.push(
            session_id,
            MacroActionKind::Select {
                selector: selector.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub fn record_wait(&self, session_id: &str, ms: u64) {
        self.push(session_id, MacroActionKind::Wait { ms });
    }

    pub fn record_eval(&self, session_id: &str, code: &str) {
        self.push(
            session_id,
            MacroActionKind::Eval {
                code: code.to_string(),
            },
        );
    }

    fn push(&self, session_id: &str, kind: MacroActionKind) {
        if let Some(active) = self.active.get(session_id) {
            active
                .recording
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .actions
                .push(MacroAction::new(kind));
        }
    }
}

impl Drop for MacroRecorder {
    fn drop(&mut self) {
        for entry in self.active.iter() {
            entry.value().nav_task.abort();
        }
    }
}
