//! Timestamp-ordered message log with in-place temp id promotion.

use cyan_core::{ChatMessage, SyncState};

/// Messages ordered by ascending timestamp; confirmed ids are unique.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    fn insert_sorted(&mut self, message: ChatMessage) {
        let at = self
            .entries
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.entries.insert(at, message);
    }

    pub fn insert_optimistic(&mut self, message: ChatMessage) {
        self.insert_sorted(message);
    }

    /// Insert a confirmed message; `false` if its id is already present.
    pub fn insert_confirmed(&mut self, mut message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        message.sync = SyncState::Confirmed;
        self.insert_sorted(message);
        true
    }

    /// Swap a temp id for its confirmed id without moving the entry.
    ///
    /// If the confirmed id is already in the log the temp entry is dropped
    /// instead, so no id appears twice.
    pub fn promote(&mut self, temp_id: &str, confirmed_id: &str) -> bool {
        let Some(index) = self.entries.iter().position(|m| m.id == temp_id) else {
            return false;
        };
        if self.contains(confirmed_id) {
            self.entries.remove(index);
            return true;
        }
        let entry = &mut self.entries[index];
        entry.id = confirmed_id.to_string();
        entry.sync = SyncState::Confirmed;
        true
    }

    pub fn set_sync(&mut self, id: &str, sync: SyncState) -> bool {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                entry.sync = sync;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let index = self.entries.iter().position(|m| m.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.entries.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|m| m.id == id)
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
