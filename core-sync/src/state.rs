//! # Language State Machine
//!
//! Tracks where each language partition is in its sync lifecycle and rejects
//! transitions that would indicate two operations racing on one language.
//!
//! ## State Machine
//!
//! ```text
//! Absent → Downloading → Importing → Present
//!   ↑          │             │          │
//!   │          └─────────────┴──→ Absent / Present (on failure)
//!   │                                   │
//!   └────────────── Removing ←──────────┘
//! ```
//!
//! A present language may go back to `Downloading` when it is refreshed. A
//! failed download or import returns the language to `Present` when rows
//! from an earlier import remain, otherwise to `Absent`.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageState {
    #[default]
    Absent,
    Downloading,
    Importing,
    Present,
    Removing,
}

impl LanguageState {
    /// Whether an operation currently owns the language
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LanguageState::Downloading | LanguageState::Importing | LanguageState::Removing
        )
    }

    pub fn can_transition_to(&self, next: LanguageState) -> bool {
        use LanguageState::*;
        matches!(
            (self, next),
            (Absent, Downloading)
                | (Present, Downloading)
                | (Downloading, Importing)
                | (Downloading, Absent)
                | (Downloading, Present)
                | (Importing, Present)
                | (Importing, Absent)
                | (Present, Removing)
                | (Removing, Absent)
                | (Removing, Present)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageState::Absent => "absent",
            LanguageState::Downloading => "downloading",
            LanguageState::Importing => "importing",
            LanguageState::Present => "present",
            LanguageState::Removing => "removing",
        }
    }
}

impl FromStr for LanguageState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "absent" => Ok(LanguageState::Absent),
            "downloading" => Ok(LanguageState::Downloading),
            "importing" => Ok(LanguageState::Importing),
            "present" => Ok(LanguageState::Present),
            "removing" => Ok(LanguageState::Removing),
            other => Err(format!("Unknown language state: {}", other)),
        }
    }
}

impl fmt::Display for LanguageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-language states shared by concurrent sync operations
#[derive(Debug, Default)]
pub struct LanguageStates {
    states: Mutex<HashMap<String, LanguageState>>,
}

impl LanguageStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed states from the languages found in the store
    pub fn mark_present<I, S>(&self, languages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut states) = self.states.lock() {
            for language in languages {
                let entry = states.entry(language.into()).or_default();
                if !entry.is_busy() {
                    *entry = LanguageState::Present;
                }
            }
        }
    }

    pub fn get(&self, language: &str) -> LanguageState {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(language).copied())
            .unwrap_or_default()
    }

    /// Move `language` to `next`, failing if the current state does not allow it.
    pub fn transition(&self, language: &str, next: LanguageState) -> Result<LanguageState> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| SyncError::Internal("language state lock poisoned".to_string()))?;
        let current = states.get(language).copied().unwrap_or_default();

        if !current.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                language: language.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        states.insert(language.to_string(), next);
        Ok(current)
    }

    /// Forget every language, after a destructive rebuild
    pub fn reset(&self) {
        if let Ok(mut states) = self.states.lock() {
            states.clear();
        }
    }
}
