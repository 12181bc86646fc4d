// Session-wide resolution cache: canonical link -> target + state

use crate::model::{ResolutionEntry, ResolutionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Every canonical link seen in the session. Entries are created on first
/// sight and only move forward:
///
/// ```text
/// Unvisited -> Resolved | Failed | CorsBlocked
/// CorsBlocked -> Resolved | Failed
/// ```
///
/// Nothing is ever removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionCache {
    entries: BTreeMap<String, ResolutionEntry>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical: &str) -> Option<&ResolutionEntry> {
        self.entries.get(canonical)
    }

    pub fn state(&self, canonical: &str) -> ResolutionState {
        self.entries
            .get(canonical)
            .map(|entry| entry.state)
            .unwrap_or(ResolutionState::Unvisited)
    }

    pub fn target(&self, canonical: &str) -> Option<&str> {
        self.entries.get(canonical).and_then(|entry| entry.target.as_deref())
    }

    pub fn is_visited(&self, canonical: &str) -> bool {
        self.state(canonical) != ResolutionState::Unvisited
    }

    /// Registers a link; returns true if it was not known before.
    pub fn observe(&mut self, canonical: &str) -> bool {
        if self.entries.contains_key(canonical) {
            return false;
        }
        self.entries
            .insert(canonical.to_string(), ResolutionEntry::new(canonical.to_string()));
        true
    }

    pub fn resolve(&mut self, canonical: &str, target: &str) -> bool {
        self.transition(canonical, ResolutionState::Resolved, |entry| {
            entry.target = Some(target.to_string());
        })
    }

    /// Parks a link for the remote fallback, recording any partial target.
    pub fn block(&mut self, canonical: &str, partial: Option<&str>) -> bool {
        self.transition(canonical, ResolutionState::CorsBlocked, |entry| {
            if let Some(partial) = partial {
                entry.target = Some(partial.to_string());
            }
        })
    }

    /// Marks a link as unresolvable. A partial target already recorded stays.
    pub fn fail(&mut self, canonical: &str) -> bool {
        self.transition(canonical, ResolutionState::Failed, |_| {})
    }

    fn transition<F>(&mut self, canonical: &str, to: ResolutionState, update: F) -> bool
    where
        F: FnOnce(&mut ResolutionEntry),
    {
        self.observe(canonical);
        let Some(entry) = self.entries.get_mut(canonical) else {
            return false;
        };

        let allowed = matches!(
            (entry.state, to),
            (ResolutionState::Unvisited, ResolutionState::Resolved)
                | (ResolutionState::Unvisited, ResolutionState::Failed)
                | (ResolutionState::Unvisited, ResolutionState::CorsBlocked)
                | (ResolutionState::CorsBlocked, ResolutionState::Resolved)
                | (ResolutionState::CorsBlocked, ResolutionState::Failed)
        );
        if !allowed {
            debug!(
                "Ignoring transition {} -> {} for {}",
                entry.state.as_str(),
                to.as_str(),
                canonical
            );
            return false;
        }

        update(entry);
        entry.state = to;
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, state: ResolutionState) -> usize {
        self.entries.values().filter(|entry| entry.state == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionEntry> {
        self.entries.values()
    }
}
