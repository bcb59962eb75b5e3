//! # cyan-core — domain model and wire contract for the Cyan client
//!
//! Holds the entity types every reconciliation store projects, the closed
//! command/event enums exchanged with the native engine, and the foreign
//! boundary those payloads travel through.
//!
//! ## Modules
//!
//! - [`protocol`] — subsystem names, command/event enums, JSON codec
//! - [`ffi`] — `Boundary` trait and the C function-pointer adapter

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod ffi;
pub mod protocol;

pub use ffi::{Boundary, ForeignBoundary};
pub use protocol::{
    decode, decode_event, encode, ChatCommand, ChatEvent, CodecError, GridCommand, GridEvent,
    NetworkCommand, NetworkEvent, Subsystem, TreeCommand, TreeEvent,
};

/// Board type used when the engine omits one.
pub const DEFAULT_BOARD_TYPE: &str = "canvas";

/// Milliseconds since the Unix epoch, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn default_board_type() -> String {
    DEFAULT_BOARD_TYPE.to_string()
}

/// Reconciliation state of a projected entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Applied locally, waiting for the engine to echo it.
    Pending,
    /// Known to the engine.
    #[default]
    Confirmed,
    /// Never confirmed: the send was rejected or the echo timed out.
    Unconfirmed,
}

impl SyncState {
    pub fn is_confirmed(self) -> bool {
        self == SyncState::Confirmed
    }
}

// ───────────────────────────────────────────────────────────────────
// Tree entities
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub owner_node_id: Option<String>,
    #[serde(skip)]
    pub sync: SyncState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub owner_node_id: Option<String>,
    #[serde(skip)]
    pub sync: SyncState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    #[serde(default = "default_board_type")]
    pub board_type: String,
    #[serde(default)]
    pub owner_node_id: Option<String>,
    #[serde(skip)]
    pub sync: SyncState,
}

/// Full tree carried (as a JSON string) by `TreeLoaded`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    #[serde(default)]
    pub boards: Vec<Board>,
}

impl TreeSnapshot {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.workspaces.is_empty() && self.boards.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// Messages
// ───────────────────────────────────────────────────────────────────

/// A chat or direct message as the engine reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub author: String,
    pub message: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub timestamp: i64,
}

/// A message held in a store's log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub body: String,
    pub workspace_id: Option<String>,
    pub parent_id: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub sync: SyncState,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            author: wire.author,
            body: wire.message,
            workspace_id: wire.workspace_id,
            parent_id: wire.parent_id,
            timestamp: wire.timestamp,
            sync: SyncState::Confirmed,
        }
    }
}

/// Denormalized per-peer view of a direct-message log.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub peer_id: String,
    pub unread_count: usize,
    pub last_message: Option<String>,
    pub last_message_time: Option<i64>,
}

// ───────────────────────────────────────────────────────────────────
// Board grid
// ───────────────────────────────────────────────────────────────────

/// Board metadata as listed by `BoardsLoaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMetadata {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    #[serde(default = "default_board_type")]
    pub board_type: String,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One cell of the board grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardCard {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub board_type: String,
    pub rating: u8,
    pub labels: Vec<String>,
    pub sync: SyncState,
}

impl From<BoardMetadata> for BoardCard {
    fn from(meta: BoardMetadata) -> Self {
        Self {
            id: meta.id,
            workspace_id: meta.workspace_id,
            name: meta.name,
            board_type: meta.board_type,
            rating: meta.rating,
            labels: meta.labels,
            sync: SyncState::Confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults_board_type() {
        let json = r#"{
            "groups": [{"id": "g1", "name": "Eng"}],
            "workspaces": [{"id": "w1", "group_id": "g1", "name": "Core"}],
            "boards": [{"id": "b1", "workspace_id": "w1", "name": "Plan"}]
        }"#;
        let snapshot: TreeSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.boards[0].board_type, "canvas");
        assert_eq!(snapshot.groups[0].sync, SyncState::Confirmed);
        assert!(snapshot.groups[0].owner_node_id.is_none());
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_wire_message_into_chat_message() {
        let wire = WireMessage {
            id: "m1".into(),
            author: "alice".into(),
            message: "hi".into(),
            workspace_id: Some("w1".into()),
            parent_id: None,
            timestamp: 42,
        };
        let msg = ChatMessage::from(wire);
        assert_eq!(msg.body, "hi");
        assert!(msg.sync.is_confirmed());
    }

    #[test]
    fn test_now_millis_is_positive() {
        assert!(now_millis() > 0);
    }
}
