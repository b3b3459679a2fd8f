//! Macro data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use webgate_driver::Viewport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroAction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MacroActionKind,
}

impl MacroAction {
    pub fn new(kind: MacroActionKind) -> Self {
        Self {
            id: format!("act-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MacroActionKind {
    Navigation {
        url: String,
    },
    Click {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<(f64, f64)>,
    },
    Type {
        selector: String,
        text: String,
    },
    Select {
        selector: String,
        value: String,
    },
    Wait {
        ms: u64,
    },
    Eval {
        code: String,
    },
}

impl MacroActionKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Navigation { .. } => "navigation",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Select { .. } => "select",
            Self::Wait { .. } => "wait",
            Self::Eval { .. } => "eval",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            Self::Click { selector, .. }
            | Self::Type { selector, .. }
            | Self::Select { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroMetadata {
    pub start_url: Option<String>,
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroRecording {
    pub id: String,
    pub name: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub actions: Vec<MacroAction>,
    pub metadata: MacroMetadata,
}

/// Listing entry; the full action list stays in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSummary {
    pub id: String,
    pub name: String,
    pub action_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&MacroRecording> for MacroSummary {
    fn from(recording: &MacroRecording) -> Self {
        Self {
            id: recording.id.clone(),
            name: recording.name.clone(),
            action_count: recording.actions.len(),
            started_at: recording.started_at,
            description: recording.metadata.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackOptions {
    pub start_from_step: usize,
    pub end_at_step: Option<usize>,
    pub delay_between_actions_ms: u64,
    pub step_by_step: bool,
    pub continue_on_error: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            start_from_step: 0,
            end_at_step: None,
            delay_between_actions_ms: 0,
            step_by_step: false,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackError {
    pub step: usize,
    pub action_id: String,
    pub action_kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResult {
    pub macro_id: String,
    pub executed_actions: usize,
    pub total_actions: usize,
    pub errors: Vec<PlaybackError>,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_serialises_with_type_tag() {
        let action = MacroAction::new(MacroActionKind::Click {
            selector: "#go".into(),
            position: None,
        });
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["selector"], "#go");
        assert!(json.get("position").is_none());
    }

    #[test]
    fn playback_options_default_from_empty_json() {
        let options: PlaybackOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.start_from_step, 0);
        assert!(options.end_at_step.is_none());
        assert!(!options.continue_on_error);
    }
}
