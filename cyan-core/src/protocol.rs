//! Command/event wire contract for every engine subsystem.
//!
//! Wire format (UTF-8 JSON, one object per payload):
//! ```text
//! { "type": "CreateGroup", "name": "Eng", "icon": "folder", "color": "#00AACC" }
//!   └──┬──┘  └──────────────── variant fields ───────────────────────────┘
//!      └── mandatory tag, selects the variant
//! ```
//!
//! Each subsystem gets a closed command enum and a closed event enum. Unknown
//! event tags land in an explicit `Unknown` variant so the drop path is a
//! match arm rather than a silent `None`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{BoardMetadata, WireMessage};

/// A named, independent command/event queue exposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subsystem(&'static str);

impl Subsystem {
    pub const FILE_TREE: Subsystem = Subsystem("file_tree");
    pub const CHAT_PANEL: Subsystem = Subsystem("chat_panel");
    pub const BOARD_GRID: Subsystem = Subsystem("board_grid");
    pub const WHITEBOARD: Subsystem = Subsystem("whiteboard");
    pub const NETWORK: Subsystem = Subsystem("network");

    pub const fn new(name: &'static str) -> Self {
        Subsystem(name)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Binds a subsystem name to its command and event types.
pub trait Protocol: Send + Sync + 'static {
    const SUBSYSTEM: Subsystem;
    type Command: Serialize + fmt::Debug + Send + Sync;
    type Event: DeserializeOwned + Clone + fmt::Debug + Send + 'static;
}

pub struct FileTreeProtocol;
pub struct ChatProtocol;
pub struct GridProtocol;
pub struct NetworkProtocol;

impl Protocol for FileTreeProtocol {
    const SUBSYSTEM: Subsystem = Subsystem::FILE_TREE;
    type Command = TreeCommand;
    type Event = TreeEvent;
}

impl Protocol for ChatProtocol {
    const SUBSYSTEM: Subsystem = Subsystem::CHAT_PANEL;
    type Command = ChatCommand;
    type Event = ChatEvent;
}

impl Protocol for GridProtocol {
    const SUBSYSTEM: Subsystem = Subsystem::BOARD_GRID;
    type Command = GridCommand;
    type Event = GridEvent;
}

impl Protocol for NetworkProtocol {
    const SUBSYSTEM: Subsystem = Subsystem::NETWORK;
    type Command = NetworkCommand;
    type Event = NetworkEvent;
}

// ───────────────────────────────────────────────────────────────────
// file_tree
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeCommand {
    Snapshot,
    SeedDemoIfEmpty,
    CreateGroup {
        name: String,
        icon: String,
        color: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    RenameGroup { id: String, name: String },
    DeleteGroup { id: String },
    CreateWorkspace {
        group_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    RenameWorkspace { id: String, name: String },
    DeleteWorkspace { id: String },
    CreateBoard {
        workspace_id: String,
        name: String,
        board_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    RenameBoard { id: String, name: String },
    DeleteBoard { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeEvent {
    /// `data` is itself a JSON-encoded `TreeSnapshot`.
    TreeLoaded { data: String },
    GroupCreated {
        id: String,
        name: String,
        #[serde(default)]
        icon: String,
        #[serde(default)]
        color: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    GroupRenamed { id: String, name: String },
    GroupDeleted { id: String },
    WorkspaceCreated {
        id: String,
        group_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    WorkspaceRenamed { id: String, name: String },
    WorkspaceDeleted { id: String },
    BoardCreated {
        id: String,
        workspace_id: String,
        name: String,
        #[serde(default = "crate::default_board_type")]
        board_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    BoardRenamed { id: String, name: String },
    BoardDeleted { id: String },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

// ───────────────────────────────────────────────────────────────────
// chat_panel
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatCommand {
    SendChat {
        workspace_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    LoadChatHistory { workspace_id: String },
    DeleteChat { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    ChatSent {
        id: String,
        workspace_id: String,
        author: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    ChatHistory {
        workspace_id: String,
        messages: Vec<WireMessage>,
    },
    ChatDeleted { id: String },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

// ───────────────────────────────────────────────────────────────────
// board_grid
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GridCommand {
    LoadBoards { workspace_id: String },
    SetBoardRating { id: String, rating: u8 },
    SetBoardLabels { id: String, labels: Vec<String> },
    DeleteBoard { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GridEvent {
    BoardsLoaded {
        workspace_id: String,
        boards: Vec<BoardMetadata>,
    },
    BoardMetadataUpdated {
        id: String,
        rating: u8,
        labels: Vec<String>,
    },
    BoardDeleted { id: String },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

// ───────────────────────────────────────────────────────────────────
// network (direct messages)
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NetworkCommand {
    SendDirectMessage {
        peer_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    LoadDirectMessages { peer_id: String },
    MarkConversationRead { peer_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NetworkEvent {
    DirectMessage {
        id: String,
        peer_id: String,
        author: String,
        message: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    DirectHistory {
        peer_id: String,
        messages: Vec<WireMessage>,
    },
    ConversationRead { peer_id: String, read_at: i64 },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

// ───────────────────────────────────────────────────────────────────
// Codec
// ───────────────────────────────────────────────────────────────────

/// Why an inbound payload could not become an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("payload has no string `type` field")]
    MissingType,

    #[error("invalid fields for `{kind}`: {reason}")]
    InvalidFields { kind: String, reason: String },
}

/// Encode an outbound command.
///
/// Commands are built from typed constructors, so serialization cannot fail;
/// an empty string is returned in the impossible case.
pub fn encode<C: Serialize>(command: &C) -> String {
    serde_json::to_string(command).unwrap_or_default()
}

/// Decode an inbound payload into a typed event.
pub fn decode<E: DeserializeOwned>(payload: &str) -> Result<E, CodecError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_string();
    serde_json::from_value(value).map_err(|e| CodecError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

/// Decode, logging and discarding payloads that do not parse.
pub fn decode_event<E: DeserializeOwned>(subsystem: Subsystem, payload: &str) -> Option<E> {
    match decode(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("[{subsystem}] dropping payload: {e}");
            None
        }
    }
}
