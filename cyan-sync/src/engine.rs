//! In-process engine boundary with per-subsystem FIFO queues.
//!
//! Stands in for the native engine wherever the real library is absent:
//! tests push events and inspect sent commands, the desktop demo layers its
//! simulated engine on top of it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use cyan_core::ffi::Boundary;
use cyan_core::protocol::{decode, encode, Subsystem};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Default)]
struct EngineState {
    ready: bool,
    queues: HashMap<String, VecDeque<String>>,
    sent: HashMap<String, Vec<String>>,
}

/// Memory-backed [`Boundary`].
#[derive(Debug)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// A ready engine with empty queues.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                ready: true,
                ..EngineState::default()
            }),
        }
    }

    /// An engine that rejects every send until [`set_ready`](Self::set_ready).
    pub fn not_ready() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Queue a raw payload for the next poll on `subsystem`.
    pub fn push_event(&self, subsystem: Subsystem, payload: impl Into<String>) {
        self.lock()
            .queues
            .entry(subsystem.as_str().to_string())
            .or_default()
            .push_back(payload.into());
    }

    /// Queue a typed event.
    pub fn push<E: Serialize>(&self, subsystem: Subsystem, event: &E) {
        self.push_event(subsystem, encode(event));
    }

    /// Number of payloads waiting on `subsystem`.
    pub fn queued(&self, subsystem: Subsystem) -> usize {
        self.lock()
            .queues
            .get(subsystem.as_str())
            .map_or(0, VecDeque::len)
    }

    /// Every payload accepted on `subsystem`, oldest first.
    pub fn sent(&self, subsystem: Subsystem) -> Vec<String> {
        self.lock()
            .sent
            .get(subsystem.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Sent payloads decoded as commands; undecodable entries are skipped.
    pub fn sent_commands<C: DeserializeOwned>(&self, subsystem: Subsystem) -> Vec<C> {
        self.sent(subsystem)
            .iter()
            .filter_map(|payload| decode(payload).ok())
            .collect()
    }

    /// Drain the sent log for `subsystem`.
    pub fn take_sent(&self, subsystem: Subsystem) -> Vec<String> {
        self.lock()
            .sent
            .remove(subsystem.as_str())
            .unwrap_or_default()
    }
}

impl Boundary for MemoryEngine {
    fn send(&self, subsystem: &str, payload: &str) -> bool {
        let mut state = self.lock();
        if !state.ready {
            return false;
        }
        state
            .sent
            .entry(subsystem.to_string())
            .or_default()
            .push(payload.to_string());
        true
    }

    fn poll(&self, subsystem: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.ready {
            return None;
        }
        state.queues.get_mut(subsystem)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyan_core::protocol::TreeCommand;

    #[test]
    fn test_fifo_per_subsystem() {
        let engine = MemoryEngine::new();
        engine.push_event(Subsystem::FILE_TREE, "a");
        engine.push_event(Subsystem::FILE_TREE, "b");
        engine.push_event(Subsystem::NETWORK, "c");

        assert_eq!(engine.queued(Subsystem::FILE_TREE), 2);
        assert_eq!(engine.poll("file_tree").as_deref(), Some("a"));
        assert_eq!(engine.poll("network").as_deref(), Some("c"));
        assert_eq!(engine.poll("file_tree").as_deref(), Some("b"));
        assert!(engine.poll("file_tree").is_none());
    }

    #[test]
    fn test_not_ready_rejects() {
        let engine = MemoryEngine::not_ready();
        engine.push_event(Subsystem::FILE_TREE, "queued");

        assert!(!engine.send("file_tree", "x"));
        assert!(engine.poll("file_tree").is_none());
        assert!(engine.sent(Subsystem::FILE_TREE).is_empty());

        engine.set_ready(true);
        assert!(engine.send("file_tree", "x"));
        assert_eq!(engine.poll("file_tree").as_deref(), Some("queued"));
    }

    #[test]
    fn test_sent_commands_decode() {
        let engine = MemoryEngine::new();
        engine.send("file_tree", &encode(&TreeCommand::Snapshot));
        engine.send("file_tree", "garbage");

        let commands: Vec<TreeCommand> = engine.sent_commands(Subsystem::FILE_TREE);
        assert_eq!(commands, vec![TreeCommand::Snapshot]);
        assert_eq!(engine.take_sent(Subsystem::FILE_TREE).len(), 2);
        assert!(engine.sent(Subsystem::FILE_TREE).is_empty());
    }
}
