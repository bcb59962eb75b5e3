//! Per-subsystem command/event channel over the engine boundary.
//!
//! ```text
//!            EngineLink (Arc<dyn Boundary> + claim registry)
//!              │ open_channel("file_tree")   → Channel  ─┐ exclusive
//!              │ open_channel("file_tree")   → Err(SubsystemClaimed)
//!              │ open_channel("chat_panel")  → Channel  ─┘ independent queues
//! ```
//!
//! A channel holds its subsystem claim until dropped, so two consumers can
//! never split one subsystem's event queue between them.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use cyan_core::ffi::Boundary;
use cyan_core::protocol::Subsystem;

use crate::error::SyncError;

type Claims = Arc<Mutex<HashSet<Subsystem>>>;

fn lock(claims: &Claims) -> MutexGuard<'_, HashSet<Subsystem>> {
    claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to the engine; hands out exclusive per-subsystem channels.
#[derive(Clone)]
pub struct EngineLink {
    boundary: Arc<dyn Boundary>,
    claims: Claims,
}

impl EngineLink {
    pub fn new(boundary: Arc<dyn Boundary>) -> Self {
        Self {
            boundary,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `subsystem` and return its channel.
    pub fn open_channel(&self, subsystem: Subsystem) -> Result<Channel, SyncError> {
        if !lock(&self.claims).insert(subsystem) {
            return Err(SyncError::SubsystemClaimed(subsystem));
        }
        log::debug!("[{subsystem}] channel opened");
        Ok(Channel {
            subsystem,
            boundary: self.boundary.clone(),
            claims: self.claims.clone(),
        })
    }

    pub fn is_claimed(&self, subsystem: Subsystem) -> bool {
        lock(&self.claims).contains(&subsystem)
    }
}

impl fmt::Debug for EngineLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLink")
            .field("claims", &*lock(&self.claims))
            .finish()
    }
}

/// Send/poll pair bound to one subsystem.
pub struct Channel {
    subsystem: Subsystem,
    boundary: Arc<dyn Boundary>,
    claims: Claims,
}

impl Channel {
    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    /// Fire-and-forget send. `false` means the boundary rejected the call.
    pub fn send(&self, payload: &str) -> bool {
        self.boundary.send(self.subsystem.as_str(), payload)
    }

    /// Dequeue at most one pending payload.
    pub fn poll(&self) -> Option<String> {
        self.boundary.poll(self.subsystem.as_str())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("subsystem", &self.subsystem).finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        lock(&self.claims).remove(&self.subsystem);
        log::debug!("[{}] channel released", self.subsystem);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    #[test]
    fn test_subsystem_claim_is_exclusive() {
        let link = EngineLink::new(Arc::new(MemoryEngine::new()));

        let tree = link.open_channel(Subsystem::FILE_TREE).unwrap();
        assert!(link.is_claimed(Subsystem::FILE_TREE));
        assert_eq!(
            link.open_channel(Subsystem::FILE_TREE).unwrap_err(),
            SyncError::SubsystemClaimed(Subsystem::FILE_TREE)
        );

        // Other subsystems are independent.
        let _chat = link.open_channel(Subsystem::CHAT_PANEL).unwrap();

        drop(tree);
        assert!(!link.is_claimed(Subsystem::FILE_TREE));
        assert!(link.open_channel(Subsystem::FILE_TREE).is_ok());
    }

    #[test]
    fn test_channel_routes_by_subsystem() {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let tree = link.open_channel(Subsystem::FILE_TREE).unwrap();
        let chat = link.open_channel(Subsystem::CHAT_PANEL).unwrap();

        engine.push_event(Subsystem::CHAT_PANEL, r#"{"type":"Unknown"}"#);
        assert!(tree.poll().is_none());
        assert_eq!(chat.poll().as_deref(), Some(r#"{"type":"Unknown"}"#));

        assert!(tree.send(r#"{"type":"Snapshot"}"#));
        assert_eq!(engine.sent(Subsystem::FILE_TREE), vec![r#"{"type":"Snapshot"}"#.to_string()]);
        assert!(engine.sent(Subsystem::CHAT_PANEL).is_empty());
    }
}
