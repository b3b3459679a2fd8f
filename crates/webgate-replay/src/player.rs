//! Macro playback state machine.

use crate::error::{ReplayError, ReplayResult};
use crate::model::{MacroActionKind, PlaybackError, PlaybackOptions, PlaybackResult};
use crate::storage::MacroStorage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webgate_driver::{ClickParams, GotoParams, WaitUntil};
use webgate_security::EvalPolicy;
use webgate_session::Session;

/// Selector waits during playback.
const ACTION_TIMEOUT_MS: u64 = 30_000;
/// Poll interval while paused or stepping.
const PAUSE_POLL: Duration = Duration::from_millis(50);

struct PlaybackControl {
    macro_id: String,
    active: AtomicBool,
    paused: AtomicBool,
    current_step: AtomicUsize,
}

pub struct MacroPlayer {
    storage: Arc<dyn MacroStorage>,
    eval_policy: Arc<EvalPolicy>,
    active: DashMap<String, Arc<PlaybackControl>>,
}

impl MacroPlayer {
    pub fn new(storage: Arc<dyn MacroStorage>, eval_policy: Arc<EvalPolicy>) -> Self {
        Self {
            storage,
            eval_policy,
            active: DashMap::new(),
        }
    }

    /// Drive `macro_id` against `session`. One playback per session.
    pub async fn play(
        &self,
        session: Arc<Session>,
        macro_id: &str,
        options: PlaybackOptions,
    ) -> ReplayResult<PlaybackResult> {
        let recording = self
            .storage
            .get(macro_id)
            .await?
            .ok_or_else(|| ReplayError::MacroNotFound {
                id: macro_id.to_string(),
            })?;

        let control = Arc::new(PlaybackControl {
            macro_id: macro_id.to_string(),
            active: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            current_step: AtomicUsize::new(options.start_from_step),
        });
        {
            // Entry-based insert so two racing plays cannot both win.
            match self.active.entry(session.id().to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(ReplayError::PlaybackActive {
                        session_id: session.id().to_string(),
                    });
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(control.clone());
                }
            }
        }

        info!(
            session_id = %session.id(),
            macro_id = %macro_id,
            total = recording.actions.len(),
            "playback started"
        );
        let result = self
            .run(&session, &recording.actions, &options, &control, macro_id)
            .await;
        self.active.remove(session.id());
        result
    }

    /// Pause the session's playback; observed between actions.
    pub fn pause(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(control) => {
                control.paused.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(control) => {
                control.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Stop the session's playback; the loop observes the flag between
    /// actions.
    pub fn stop(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(control) => {
                control.active.store(false, Ordering::SeqCst);
                control.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn playback_state(&self, session_id: &str) -> Option<(String, usize, bool)> {
        self.active.get(session_id).map(|c| {
            (
                c.macro_id.clone(),
                c.current_step.load(Ordering::SeqCst),
                c.paused.load(Ordering::SeqCst),
            )
        })
    }

    async fn run(
        &self,
        session: &Arc<Session>,
        actions: &[crate::model::MacroAction],
        options: &PlaybackOptions,
        control: &Arc<PlaybackControl>,
        macro_id: &str,
    ) -> ReplayResult<PlaybackResult> {
        let total = actions.len();
        let end = options
            .end_at_step
            .map(|e| e.min(total))
            .unwrap_or(total);
        let start = options.start_from_step.min(end);

        let mut executed = 0usize;
        let mut errors = Vec::new();
        let mut completed = true;

        for (step, action) in actions[start..end].iter().enumerate().map(|(i, a)| (i + start, a)) {
            // Pause and stop are honoured between actions.
            while control.paused.load(Ordering::SeqCst) && control.active.load(Ordering::SeqCst) {
                sleep(PAUSE_POLL).await;
            }
            if !control.active.load(Ordering::SeqCst) {
                info!(session_id = %session.id(), step, "playback stopped");
                completed = false;
                break;
            }
            control.current_step.store(step, Ordering::SeqCst);

            match self.execute(session, &action.kind).await {
                Ok(()) => {
                    executed += 1;
                    session.touch();
                    debug!(session_id = %session.id(), step, kind = action.kind.kind_name(), "action executed");
                }
                Err(e) => {
                    warn!(
                        session_id = %session.id(),
                        step,
                        kind = action.kind.kind_name(),
                        error = %e,
                        "action failed"
                    );
                    errors.push(PlaybackError {
                        step,
                        action_id: action.id.clone(),
                        action_kind: action.kind.kind_name(),
                        selector: action.kind.selector().map(str::to_string),
                        message: e.to_string(),
                    });
                    if !options.continue_on_error {
                        completed = false;
                        break;
                    }
                }
            }

            if options.delay_between_actions_ms > 0 {
                sleep(Duration::from_millis(options.delay_between_actions_ms)).await;
            }
            if options.step_by_step && step + 1 < end {
                control.paused.store(true, Ordering::SeqCst);
            }
        }

        Ok(PlaybackResult {
            macro_id: macro_id.to_string(),
            executed_actions: executed,
            total_actions: end.saturating_sub(start),
            errors,
            completed,
        })
    }

    async fn execute(&self, session: &Arc<Session>, kind: &MacroActionKind) -> ReplayResult<()> {
        let page = session.page()?;
        match kind {
            MacroActionKind::Navigation { url } => {
                page.goto(
                    url,
                    GotoParams {
                        wait_until: WaitUntil::NetworkIdle,
                        timeout_ms: Some(ACTION_TIMEOUT_MS),
                    },
                )
                .await?;
            }
            MacroActionKind::Click { selector, position } => {
                page.click(
                    selector,
                    ClickParams {
                        position: *position,
                        force: false,
                        timeout_ms: Some(ACTION_TIMEOUT_MS),
                    },
                )
                .await?;
            }
            MacroActionKind::Type { selector, text } => {
                page.fill(selector, text, Some(ACTION_TIMEOUT_MS)).await?;
            }
            MacroActionKind::Select { selector, value } => {
                page.select_option(selector, value, Some(ACTION_TIMEOUT_MS))
                    .await?;
            }
            MacroActionKind::Wait { ms } => {
                sleep(Duration::from_millis(*ms)).await;
            }
            MacroActionKind::Eval { code } => {
                self.eval_policy.check(code)?;
                page.evaluate(code).await?;
            }
        }
        Ok(())
    }
}
