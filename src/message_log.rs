//! Ordered, id-deduplicated message log.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, SessionError};
use crate::models::{DeliveryState, Message, MessageId, Millis};

/// Messages ordered by `(sent_at, id)`, so every participant sees the same
/// feed whatever order the relay delivered it in.
///
/// Entries live behind an `Arc` so a [`LogView`] is a cheap immutable
/// snapshot. Mutation copies on write only while a view is still held.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Arc<Vec<Message>>,
    ids: HashSet<MessageId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `message` in order. Returns `false` when the id is already
    /// present, in which case the log is left untouched.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            log::debug!("duplicate delivery of {} ignored", message.id);
            return false;
        }
        self.ids.insert(message.id.clone());
        let entries = Arc::make_mut(&mut self.entries);
        let at = insertion_point(entries, message.sent_at, &message.id);
        entries.insert(at, message);
        true
    }

    /// Returns `Ok(true)` if the state changed, `Ok(false)` for a same-state no-op.
    pub fn update_delivery_state(&mut self, id: &MessageId, next: DeliveryState) -> Result<bool> {
        let index = self.position(id)?;
        let current = &self.entries[index].delivery_state;
        if *current == next {
            return Ok(false);
        }
        if !current.can_transition_to(&next) {
            return Err(SessionError::InvalidTransition {
                id: id.clone(),
                from: current.clone(),
                to: next,
            });
        }
        Arc::make_mut(&mut self.entries)[index].delivery_state = next;
        Ok(true)
    }

    /// Replaces the timestamp of one entry and moves only that entry.
    pub fn reposition(&mut self, id: &MessageId, sent_at: Millis) -> Result<()> {
        let index = self.position(id)?;
        if self.entries[index].sent_at == sent_at {
            return Ok(());
        }
        let entries = Arc::make_mut(&mut self.entries);
        let mut message = entries.remove(index);
        message.sent_at = sent_at;
        let at = insertion_point(entries, sent_at, &message.id);
        entries.insert(at, message);
        Ok(())
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the log at call time.
    pub fn view(&self) -> LogView {
        LogView {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Ids of every entry still awaiting acknowledgment, in log order.
    pub fn pending_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|m| m.delivery_state.is_pending())
            .map(|m| m.id.clone())
            .collect()
    }

    fn position(&self, id: &MessageId) -> Result<usize> {
        if !self.ids.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        self.entries
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }
}

/// First index whose `(sent_at, id)` key sorts after the given one.
fn insertion_point(entries: &[Message], sent_at: Millis, id: &MessageId) -> usize {
    entries.partition_point(|m| (m.sent_at, &m.id) <= (sent_at, id))
}

/// Read-only, restartable view over a log snapshot.
#[derive(Debug, Clone, Default)]
pub struct LogView {
    entries: Arc<Vec<Message>>,
}

impl LogView {
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.id == id)
    }
}

impl<'a> IntoIterator for &'a LogView {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
