use std::collections::HashMap;

use crate::models::{Millis, TypingEntry};

/// Remote participants that recently signalled typing.
#[derive(Debug)]
pub struct PresenceTracker {
    entries: HashMap<String, TypingEntry>,
    ttl: Millis,
}

impl PresenceTracker {
    pub fn new(ttl: Millis) -> Self {
        PresenceTracker {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Millis {
        self.ttl
    }

    /// Records a typing signal and returns the moment the entry goes stale.
    ///
    /// A signal older than the one already held (reordered delivery) never
    /// moves the entry back in time.
    pub fn signal_typing(&mut self, participant_id: &str, at: Millis) -> Millis {
        let entry = self
            .entries
            .entry(participant_id.to_string())
            .or_insert_with(|| TypingEntry {
                participant_id: participant_id.to_string(),
                last_signal_at: at,
            });
        entry.last_signal_at = entry.last_signal_at.max(at);
        entry.last_signal_at.saturating_add(self.ttl)
    }

    /// Removes the entry only once its deadline has passed. A refresh that
    /// landed after the timer was armed keeps the entry alive.
    pub fn expire(&mut self, participant_id: &str, at: Millis) -> bool {
        match self.entries.get(participant_id) {
            Some(entry) if entry.last_signal_at.saturating_add(self.ttl) <= at => {
                self.entries.remove(participant_id);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, participant_id: &str) -> bool {
        self.entries.remove(participant_id).is_some()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent typist first, ties broken by participant id.
    pub fn currently_typing(&self, at: Millis) -> Vec<String> {
        let mut live: Vec<&TypingEntry> = self
            .entries
            .values()
            .filter(|e| e.last_signal_at.saturating_add(self.ttl) > at)
            .collect();
        live.sort_by(|a, b| {
            b.last_signal_at
                .cmp(&a.last_signal_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        live.into_iter().map(|e| e.participant_id.clone()).collect()
    }
}

/// Display line for the typing indicator: at most two names.
pub fn typing_banner(typing: &[String]) -> Option<String> {
    if typing.is_empty() {
        return None;
    }
    let shown: Vec<&str> = typing.iter().take(2).map(String::as_str).collect();
    Some(format!("{} is typing", shown.join(" and ")))
}
