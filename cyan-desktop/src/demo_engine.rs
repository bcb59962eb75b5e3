//! Simulated engine: applies commands to an in-memory model and queues the
//! events a real engine would emit.
//!
//! Every accepted command is answered on the next poll of its subsystem,
//! echoing `client_ref` so the client can correlate optimistic entries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use cyan_core::ffi::Boundary;
use cyan_core::protocol::{
    decode, ChatCommand, ChatEvent, GridCommand, GridEvent, NetworkCommand, NetworkEvent,
    Subsystem, TreeCommand, TreeEvent,
};
use cyan_core::{now_millis, Board, BoardMetadata, Group, SyncState, TreeSnapshot, WireMessage, Workspace};
use cyan_sync::MemoryEngine;

#[derive(Default)]
struct Model {
    tree: TreeSnapshot,
    ratings: HashMap<String, (u8, Vec<String>)>,
    chat: HashMap<String, Vec<WireMessage>>,
    direct: HashMap<String, Vec<WireMessage>>,
    next_id: u64,
}

impl Model {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn remove_group(&mut self, id: &str) {
        self.tree.groups.retain(|g| g.id != id);
        let children: Vec<String> = self
            .tree
            .workspaces
            .iter()
            .filter(|w| w.group_id == id)
            .map(|w| w.id.clone())
            .collect();
        for ws in children {
            self.remove_workspace(&ws);
        }
    }

    fn remove_workspace(&mut self, id: &str) {
        self.tree.workspaces.retain(|w| w.id != id);
        self.tree.boards.retain(|b| b.workspace_id != id);
        self.chat.remove(id);
    }

    fn seed(&mut self) {
        let group = self.mint("g");
        let workspace = self.mint("w");
        self.tree.groups.push(Group {
            id: group.clone(),
            name: "Demo".into(),
            icon: "folder".into(),
            color: "#00AACC".into(),
            owner_node_id: Some("demo-engine".into()),
            sync: SyncState::Confirmed,
        });
        self.tree.workspaces.push(Workspace {
            id: workspace.clone(),
            group_id: group,
            name: "Getting started".into(),
            owner_node_id: Some("demo-engine".into()),
            sync: SyncState::Confirmed,
        });
        for name in ["Welcome", "Roadmap"] {
            let id = self.mint("b");
            self.tree.boards.push(Board {
                id,
                workspace_id: workspace.clone(),
                name: name.into(),
                board_type: cyan_core::DEFAULT_BOARD_TYPE.into(),
                owner_node_id: Some("demo-engine".into()),
                sync: SyncState::Confirmed,
            });
        }
    }
}

/// [`Boundary`] answering commands from a [`Model`].
pub struct DemoEngine {
    queues: MemoryEngine,
    model: Mutex<Model>,
    local_author: String,
}

impl DemoEngine {
    pub fn new(local_author: impl Into<String>) -> Self {
        Self {
            queues: MemoryEngine::new(),
            model: Mutex::new(Model::default()),
            local_author: local_author.into(),
        }
    }

    fn model(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inject a direct message from `peer_id`, as if it arrived over the network.
    pub fn receive_direct(&self, peer_id: &str, body: &str) {
        let mut model = self.model();
        let id = model.mint("dm");
        let timestamp = now_millis();
        model.direct.entry(peer_id.to_string()).or_default().push(WireMessage {
            id: id.clone(),
            author: peer_id.to_string(),
            message: body.to_string(),
            workspace_id: None,
            parent_id: None,
            timestamp,
        });
        self.queues.push(
            Subsystem::NETWORK,
            &NetworkEvent::DirectMessage {
                id,
                peer_id: peer_id.to_string(),
                author: peer_id.to_string(),
                message: body.to_string(),
                timestamp,
                client_ref: None,
            },
        );
    }

    fn tree_loaded(&self, model: &Model) -> TreeEvent {
        match serde_json::to_string(&model.tree) {
            Ok(data) => TreeEvent::TreeLoaded { data },
            Err(e) => TreeEvent::Error { message: e.to_string() },
        }
    }

    fn handle_tree(&self, command: TreeCommand) -> Vec<TreeEvent> {
        let mut model = self.model();
        match command {
            TreeCommand::Snapshot => vec![self.tree_loaded(&model)],
            TreeCommand::SeedDemoIfEmpty => {
                if model.tree.is_empty() {
                    model.seed();
                    vec![self.tree_loaded(&model)]
                } else {
                    Vec::new()
                }
            }
            TreeCommand::CreateGroup { name, icon, color, client_ref } => {
                let id = model.mint("g");
                model.tree.groups.push(Group {
                    id: id.clone(),
                    name: name.clone(),
                    icon: icon.clone(),
                    color: color.clone(),
                    owner_node_id: Some(self.local_author.clone()),
                    sync: SyncState::Confirmed,
                });
                vec![TreeEvent::GroupCreated {
                    id,
                    name,
                    icon,
                    color,
                    owner_node_id: Some(self.local_author.clone()),
                    client_ref,
                }]
            }
            TreeCommand::CreateWorkspace { group_id, name, client_ref } => {
                if !model.tree.groups.iter().any(|g| g.id == group_id) {
                    return vec![TreeEvent::Error { message: format!("no group {group_id}") }];
                }
                let id = model.mint("w");
                model.tree.workspaces.push(Workspace {
                    id: id.clone(),
                    group_id: group_id.clone(),
                    name: name.clone(),
                    owner_node_id: Some(self.local_author.clone()),
                    sync: SyncState::Confirmed,
                });
                vec![TreeEvent::WorkspaceCreated {
                    id,
                    group_id,
                    name,
                    owner_node_id: Some(self.local_author.clone()),
                    client_ref,
                }]
            }
            TreeCommand::CreateBoard { workspace_id, name, board_type, client_ref } => {
                if !model.tree.workspaces.iter().any(|w| w.id == workspace_id) {
                    return vec![TreeEvent::Error { message: format!("no workspace {workspace_id}") }];
                }
                let id = model.mint("b");
                model.tree.boards.push(Board {
                    id: id.clone(),
                    workspace_id: workspace_id.clone(),
                    name: name.clone(),
                    board_type: board_type.clone(),
                    owner_node_id: Some(self.local_author.clone()),
                    sync: SyncState::Confirmed,
                });
                vec![TreeEvent::BoardCreated {
                    id,
                    workspace_id,
                    name,
                    board_type,
                    owner_node_id: Some(self.local_author.clone()),
                    client_ref,
                }]
            }
            TreeCommand::RenameGroup { id, name } => {
                if let Some(g) = model.tree.groups.iter_mut().find(|g| g.id == id) {
                    g.name = name.clone();
                }
                vec![TreeEvent::GroupRenamed { id, name }]
            }
            TreeCommand::RenameWorkspace { id, name } => {
                if let Some(w) = model.tree.workspaces.iter_mut().find(|w| w.id == id) {
                    w.name = name.clone();
                }
                vec![TreeEvent::WorkspaceRenamed { id, name }]
            }
            TreeCommand::RenameBoard { id, name } => {
                if let Some(b) = model.tree.boards.iter_mut().find(|b| b.id == id) {
                    b.name = name.clone();
                }
                vec![TreeEvent::BoardRenamed { id, name }]
            }
            TreeCommand::DeleteGroup { id } => {
                model.remove_group(&id);
                vec![TreeEvent::GroupDeleted { id }]
            }
            TreeCommand::DeleteWorkspace { id } => {
                model.remove_workspace(&id);
                vec![TreeEvent::WorkspaceDeleted { id }]
            }
            TreeCommand::DeleteBoard { id } => {
                model.tree.boards.retain(|b| b.id != id);
                vec![TreeEvent::BoardDeleted { id }]
            }
        }
    }

    fn handle_chat(&self, command: ChatCommand) -> Vec<ChatEvent> {
        let mut model = self.model();
        match command {
            ChatCommand::SendChat { workspace_id, message, parent_id, client_ref } => {
                let id = model.mint("m");
                let timestamp = now_millis();
                model.chat.entry(workspace_id.clone()).or_default().push(WireMessage {
                    id: id.clone(),
                    author: self.local_author.clone(),
                    message: message.clone(),
                    workspace_id: Some(workspace_id.clone()),
                    parent_id: parent_id.clone(),
                    timestamp,
                });
                vec![ChatEvent::ChatSent {
                    id,
                    workspace_id,
                    author: self.local_author.clone(),
                    message,
                    parent_id,
                    timestamp,
                    client_ref,
                }]
            }
            ChatCommand::LoadChatHistory { workspace_id } => {
                let messages = model.chat.get(&workspace_id).cloned().unwrap_or_default();
                vec![ChatEvent::ChatHistory { workspace_id, messages }]
            }
            ChatCommand::DeleteChat { id } => {
                for thread in model.chat.values_mut() {
                    thread.retain(|m| m.id != id);
                }
                vec![ChatEvent::ChatDeleted { id }]
            }
        }
    }

    fn handle_grid(&self, command: GridCommand) -> Vec<GridEvent> {
        let mut model = self.model();
        match command {
            GridCommand::LoadBoards { workspace_id } => {
                let boards = model
                    .tree
                    .boards
                    .iter()
                    .filter(|b| b.workspace_id == workspace_id)
                    .map(|b| {
                        let (rating, labels) = model.ratings.get(&b.id).cloned().unwrap_or_default();
                        BoardMetadata {
                            id: b.id.clone(),
                            workspace_id: b.workspace_id.clone(),
                            name: b.name.clone(),
                            board_type: b.board_type.clone(),
                            rating,
                            labels,
                        }
                    })
                    .collect();
                vec![GridEvent::BoardsLoaded { workspace_id, boards }]
            }
            GridCommand::SetBoardRating { id, rating } => {
                let entry = model.ratings.entry(id.clone()).or_default();
                entry.0 = rating;
                let labels = entry.1.clone();
                vec![GridEvent::BoardMetadataUpdated { id, rating, labels }]
            }
            GridCommand::SetBoardLabels { id, labels } => {
                let entry = model.ratings.entry(id.clone()).or_default();
                entry.1 = labels.clone();
                let rating = entry.0;
                vec![GridEvent::BoardMetadataUpdated { id, rating, labels }]
            }
            GridCommand::DeleteBoard { id } => {
                model.tree.boards.retain(|b| b.id != id);
                model.ratings.remove(&id);
                vec![GridEvent::BoardDeleted { id }]
            }
        }
    }

    fn handle_network(&self, command: NetworkCommand) -> Vec<NetworkEvent> {
        let mut model = self.model();
        match command {
            NetworkCommand::SendDirectMessage { peer_id, message, client_ref } => {
                let id = model.mint("dm");
                let timestamp = now_millis();
                model.direct.entry(peer_id.clone()).or_default().push(WireMessage {
                    id: id.clone(),
                    author: self.local_author.clone(),
                    message: message.clone(),
                    workspace_id: None,
                    parent_id: None,
                    timestamp,
                });
                vec![NetworkEvent::DirectMessage {
                    id,
                    peer_id,
                    author: self.local_author.clone(),
                    message,
                    timestamp,
                    client_ref,
                }]
            }
            NetworkCommand::LoadDirectMessages { peer_id } => {
                let messages = model.direct.get(&peer_id).cloned().unwrap_or_default();
                vec![NetworkEvent::DirectHistory { peer_id, messages }]
            }
            NetworkCommand::MarkConversationRead { peer_id } => {
                vec![NetworkEvent::ConversationRead { peer_id, read_at: now_millis() }]
            }
        }
    }

    fn reply<E: serde::Serialize>(&self, subsystem: Subsystem, events: Vec<E>) {
        for event in &events {
            self.queues.push(subsystem, event);
        }
    }
}

impl Boundary for DemoEngine {
    fn send(&self, subsystem: &str, payload: &str) -> bool {
        if !self.queues.is_ready() {
            return false;
        }
        let (target, handled) = match subsystem {
            "file_tree" => (
                Subsystem::FILE_TREE,
                decode(payload).map(|c| self.reply(Subsystem::FILE_TREE, self.handle_tree(c))),
            ),
            "chat_panel" => (
                Subsystem::CHAT_PANEL,
                decode(payload).map(|c| self.reply(Subsystem::CHAT_PANEL, self.handle_chat(c))),
            ),
            "board_grid" => (
                Subsystem::BOARD_GRID,
                decode(payload).map(|c| self.reply(Subsystem::BOARD_GRID, self.handle_grid(c))),
            ),
            "network" => (
                Subsystem::NETWORK,
                decode(payload).map(|c| self.reply(Subsystem::NETWORK, self.handle_network(c))),
            ),
            other => {
                log::warn!("demo engine has no subsystem `{other}`");
                return false;
            }
        };
        // Accepted at the boundary either way; a bad command comes back as an event.
        if let Err(e) = handled {
            log::warn!("[{target}] demo engine cannot handle command: {e}");
            let error = serde_json::json!({ "type": "Error", "message": e.to_string() });
            self.queues.push_event(target, error.to_string());
        }
        true
    }

    fn poll(&self, subsystem: &str) -> Option<String> {
        self.queues.poll(subsystem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyan_core::protocol::encode;

    fn poll_tree(engine: &DemoEngine) -> TreeEvent {
        decode(&engine.poll("file_tree").unwrap()).unwrap()
    }

    #[test]
    fn test_seed_then_snapshot() {
        let engine = DemoEngine::new("node-a");
        assert!(engine.send("file_tree", &encode(&TreeCommand::SeedDemoIfEmpty)));
        assert!(engine.send("file_tree", &encode(&TreeCommand::SeedDemoIfEmpty)));
        assert!(engine.send("file_tree", &encode(&TreeCommand::Snapshot)));

        let TreeEvent::TreeLoaded { data } = poll_tree(&engine) else {
            panic!("expected TreeLoaded");
        };
        let snapshot: TreeSnapshot = serde_json::from_str(&data).unwrap();
        assert_eq!(snapshot.groups.len(), 1);
        assert_eq!(snapshot.boards.len(), 2);

        // Second seed was a no-op; only the explicit snapshot follows.
        assert!(matches!(poll_tree(&engine), TreeEvent::TreeLoaded { .. }));
        assert!(engine.poll("file_tree").is_none());
    }

    #[test]
    fn test_create_echoes_client_ref() {
        let engine = DemoEngine::new("node-a");
        let cmd = TreeCommand::CreateGroup {
            name: "Eng".into(),
            icon: "folder".into(),
            color: "#fff".into(),
            client_ref: Some("nonce-1".into()),
        };
        engine.send("file_tree", &encode(&cmd));

        match poll_tree(&engine) {
            TreeEvent::GroupCreated { name, client_ref, .. } => {
                assert_eq!(name, "Eng");
                assert_eq!(client_ref.as_deref(), Some("nonce-1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_command_answers_with_error_event() {
        let engine = DemoEngine::new("node-a");
        assert!(engine.send("chat_panel", r#"{"type":"SendChat"}"#));
        let event: ChatEvent = decode(&engine.poll("chat_panel").unwrap()).unwrap();
        assert!(matches!(event, ChatEvent::Error { .. }));
    }

    #[test]
    fn test_unknown_subsystem_rejected() {
        let engine = DemoEngine::new("node-a");
        assert!(!engine.send("whiteboard", "{}"));
    }
}
