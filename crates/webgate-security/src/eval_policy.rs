//! Textual policy filter for user-supplied scripts.
//!
//! This is a defence-in-depth layer, not a sandbox: scripts run inside the
//! page regardless, the filter only refuses the patterns that most often
//! indicate an attempt to reach host-side APIs.

use crate::error::{SecurityError, SecurityResult};
use regex::Regex;
use tracing::warn;

pub const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    r"\brequire\s*\(",
    r"\bprocess\.",
    r"\bfs\.",
    r"child_process",
    r"__dirname",
    r"__filename",
    r"\bimport\s*\(",
];

pub struct EvalPolicy {
    patterns: Vec<(String, Regex)>,
}

impl EvalPolicy {
    /// Compile the deny-list. Entries that fail to compile as regexes are
    /// kept as escaped literals.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let raw = p.as_ref().to_string();
                let regex = Regex::new(&raw).unwrap_or_else(|_| {
                    warn!(pattern = %raw, "denied pattern is not a valid regex, matching literally");
                    Regex::new(&regex::escape(&raw)).expect("escaped literal is a valid regex")
                });
                (raw, regex)
            })
            .collect();
        Self { patterns }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DENIED_PATTERNS.iter().copied())
    }

    /// Reject `code` when any denied pattern matches.
    pub fn check(&self, code: &str) -> SecurityResult<()> {
        for (raw, regex) in &self.patterns {
            if regex.is_match(code) {
                return Err(SecurityError::ScriptDenied {
                    pattern: raw.clone(),
                });
            }
        }
        Ok(())
    }
}
