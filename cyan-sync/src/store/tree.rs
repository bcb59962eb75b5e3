//! Group → Workspace → Board tree.
//!
//! Node lifecycle:
//! ```text
//!  Nonexistent ──create──► Pending (temp id local_N) ──echo──► Confirmed ──delete──► Removed
//!                               │                                  ▲
//!                               └──timeout──► Unconfirmed          └── external *Created event
//! ```
//!
//! Invariants kept after every mutation: each workspace's group exists, each
//! board's workspace exists, and removing a node removes its descendants
//! together with any expansion, selection or ledger entries keyed by them.
//! Renames and deletes are applied immediately and are not rolled back when
//! the engine later reports an `Error`. When the target is still pending
//! they are held back and sent against the confirmed id after the echo.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use cyan_core::protocol::{FileTreeProtocol, TreeCommand, TreeEvent};
use cyan_core::{Board, Group, SyncState, TreeSnapshot, Workspace, DEFAULT_BOARD_TYPE};

use super::{Outcome, Store};
use crate::bridge::{Bridge, Subscription};
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ledger::{Fingerprint, PendingLedger, SeenIds, TempIds};

/// Which level of the tree a node lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Group,
    Workspace,
    Board,
}

impl NodeKind {
    fn rename_command(self, id: &str, name: String) -> TreeCommand {
        let id = id.to_string();
        match self {
            NodeKind::Group => TreeCommand::RenameGroup { id, name },
            NodeKind::Workspace => TreeCommand::RenameWorkspace { id, name },
            NodeKind::Board => TreeCommand::RenameBoard { id, name },
        }
    }

    fn delete_command(self, id: &str) -> TreeCommand {
        let id = id.to_string();
        match self {
            NodeKind::Group => TreeCommand::DeleteGroup { id },
            NodeKind::Workspace => TreeCommand::DeleteWorkspace { id },
            NodeKind::Board => TreeCommand::DeleteBoard { id },
        }
    }
}

/// Edits made to a node while its create was in flight.
#[derive(Debug, Clone, Default)]
struct DeferredEdit {
    rename: Option<String>,
    delete: bool,
}

fn group_fingerprint(name: &str) -> Fingerprint {
    Fingerprint::of(&["group", name])
}

fn workspace_fingerprint(group_id: &str, name: &str) -> Fingerprint {
    Fingerprint::of(&["workspace", group_id, name])
}

fn board_fingerprint(workspace_id: &str, name: &str) -> Fingerprint {
    Fingerprint::of(&["board", workspace_id, name])
}

fn clean_name(name: &str) -> Result<String, SyncError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::EmptyName);
    }
    Ok(name.to_string())
}

/// Reconciled projection of the `file_tree` subsystem.
pub struct TreeStore {
    bridge: Bridge<FileTreeProtocol>,
    events: Subscription<TreeEvent>,
    groups: Vec<Group>,
    workspaces: Vec<Workspace>,
    boards: Vec<Board>,
    expanded: HashSet<String>,
    selected_board: Option<String>,
    ledger: PendingLedger<NodeKind>,
    /// Keyed by temp id; replayed once the create is confirmed.
    deferred: HashMap<String, DeferredEdit>,
    seen: SeenIds,
    temp_ids: TempIds,
    loaded: bool,
    last_error: Option<String>,
}

impl TreeStore {
    pub fn new(channel: Channel, config: &SyncConfig) -> Self {
        let bridge = Bridge::new(channel, config.bridge());
        let events = bridge.subscribe();
        Self {
            bridge,
            events,
            groups: Vec::new(),
            workspaces: Vec::new(),
            boards: Vec::new(),
            expanded: HashSet::new(),
            selected_board: None,
            ledger: PendingLedger::new(config.pending_timeout),
            deferred: HashMap::new(),
            seen: SeenIds::new(),
            temp_ids: TempIds::new("local_"),
            loaded: false,
            last_error: None,
        }
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn board(&self, id: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn workspaces_in<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a Workspace> + 'a {
        self.workspaces.iter().filter(move |w| w.group_id == group_id)
    }

    pub fn boards_in<'a>(&'a self, workspace_id: &'a str) -> impl Iterator<Item = &'a Board> + 'a {
        self.boards.iter().filter(move |b| b.workspace_id == workspace_id)
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn selected_board(&self) -> Option<&str> {
        self.selected_board.as_deref()
    }

    /// Whether a `TreeLoaded` snapshot has been applied yet.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Describe every broken parent reference; empty when the tree is sound.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for ws in &self.workspaces {
            if self.group(&ws.group_id).is_none() {
                violations.push(format!("workspace {} references missing group {}", ws.id, ws.group_id));
            }
        }
        for board in &self.boards {
            if self.workspace(&board.workspace_id).is_none() {
                violations.push(format!(
                    "board {} references missing workspace {}",
                    board.id, board.workspace_id
                ));
            }
        }
        for id in &self.expanded {
            if self.group(id).is_none() && self.workspace(id).is_none() {
                violations.push(format!("expansion state kept for missing node {id}"));
            }
        }
        violations
    }

    // ---------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------

    pub fn request_snapshot(&self) -> bool {
        self.bridge.send(&TreeCommand::Snapshot)
    }

    pub fn seed_demo_if_empty(&self) -> bool {
        self.bridge.send(&TreeCommand::SeedDemoIfEmpty)
    }

    pub fn create_group(&mut self, name: &str, icon: &str, color: &str) -> Result<Outcome, SyncError> {
        let name = clean_name(name)?;
        let temp_id = self.temp_ids.next_id();
        self.groups.push(Group {
            id: temp_id.clone(),
            name: name.clone(),
            icon: icon.to_string(),
            color: color.to_string(),
            owner_node_id: None,
            sync: SyncState::Pending,
        });
        let nonce = self.ledger.register(
            temp_id.clone(),
            group_fingerprint(&name),
            NodeKind::Group,
            Instant::now(),
        );

        let delivered = self.bridge.send(&TreeCommand::CreateGroup {
            name,
            icon: icon.to_string(),
            color: color.to_string(),
            client_ref: Some(nonce),
        });
        self.after_create(&temp_id, NodeKind::Group, delivered);
        Ok(Outcome::created(temp_id, delivered))
    }

    pub fn create_workspace(&mut self, group_id: &str, name: &str) -> Result<Outcome, SyncError> {
        let name = clean_name(name)?;
        match self.group(group_id) {
            None => return Err(SyncError::UnknownParent(group_id.to_string())),
            Some(g) if !g.sync.is_confirmed() => {
                return Err(SyncError::UnconfirmedParent(group_id.to_string()))
            }
            Some(_) => {}
        }

        let temp_id = self.temp_ids.next_id();
        self.workspaces.push(Workspace {
            id: temp_id.clone(),
            group_id: group_id.to_string(),
            name: name.clone(),
            owner_node_id: None,
            sync: SyncState::Pending,
        });
        let nonce = self.ledger.register(
            temp_id.clone(),
            workspace_fingerprint(group_id, &name),
            NodeKind::Workspace,
            Instant::now(),
        );

        let delivered = self.bridge.send(&TreeCommand::CreateWorkspace {
            group_id: group_id.to_string(),
            name,
            client_ref: Some(nonce),
        });
        self.after_create(&temp_id, NodeKind::Workspace, delivered);
        Ok(Outcome::created(temp_id, delivered))
    }

    pub fn create_board(
        &mut self,
        workspace_id: &str,
        name: &str,
        board_type: Option<&str>,
    ) -> Result<Outcome, SyncError> {
        let name = clean_name(name)?;
        match self.workspace(workspace_id) {
            None => return Err(SyncError::UnknownParent(workspace_id.to_string())),
            Some(w) if !w.sync.is_confirmed() => {
                return Err(SyncError::UnconfirmedParent(workspace_id.to_string()))
            }
            Some(_) => {}
        }

        let board_type = board_type.unwrap_or(DEFAULT_BOARD_TYPE).to_string();
        let temp_id = self.temp_ids.next_id();
        self.boards.push(Board {
            id: temp_id.clone(),
            workspace_id: workspace_id.to_string(),
            name: name.clone(),
            board_type: board_type.clone(),
            owner_node_id: None,
            sync: SyncState::Pending,
        });
        let nonce = self.ledger.register(
            temp_id.clone(),
            board_fingerprint(workspace_id, &name),
            NodeKind::Board,
            Instant::now(),
        );

        let delivered = self.bridge.send(&TreeCommand::CreateBoard {
            workspace_id: workspace_id.to_string(),
            name,
            board_type,
            client_ref: Some(nonce),
        });
        self.after_create(&temp_id, NodeKind::Board, delivered);
        Ok(Outcome::created(temp_id, delivered))
    }

    fn after_create(&mut self, temp_id: &str, kind: NodeKind, delivered: bool) {
        if !delivered {
            self.set_node_sync(kind, temp_id, SyncState::Unconfirmed);
        }
        log::debug!("optimistic {kind:?} {temp_id} (delivered: {delivered})");
    }

    pub fn rename_group(&mut self, id: &str, name: &str) -> Result<Outcome, SyncError> {
        self.rename_node(NodeKind::Group, id, name)
    }

    pub fn rename_workspace(&mut self, id: &str, name: &str) -> Result<Outcome, SyncError> {
        self.rename_node(NodeKind::Workspace, id, name)
    }

    pub fn rename_board(&mut self, id: &str, name: &str) -> Result<Outcome, SyncError> {
        self.rename_node(NodeKind::Board, id, name)
    }

    /// Remove a group and everything under it, then tell the engine.
    pub fn delete_group(&mut self, id: &str) -> Result<Outcome, SyncError> {
        self.delete_node(NodeKind::Group, id)
    }

    pub fn delete_workspace(&mut self, id: &str) -> Result<Outcome, SyncError> {
        self.delete_node(NodeKind::Workspace, id)
    }

    pub fn delete_board(&mut self, id: &str) -> Result<Outcome, SyncError> {
        self.delete_node(NodeKind::Board, id)
    }

    /// Rename locally. A node whose create is still in flight has no id the
    /// engine knows, so the command waits in `deferred` until the echo.
    fn rename_node(&mut self, kind: NodeKind, id: &str, name: &str) -> Result<Outcome, SyncError> {
        let name = clean_name(name)?;
        if !self.set_node_name(kind, id, &name) {
            return Err(SyncError::UnknownEntity(id.to_string()));
        }
        if self.ledger.contains_temp(id) {
            log::debug!("rename of {kind:?} {id} deferred until confirmed");
            self.deferred.entry(id.to_string()).or_default().rename = Some(name);
            return Ok(Outcome::local());
        }
        if self.temp_ids.is_temp(id) {
            return Ok(Outcome::local());
        }
        Ok(Outcome::sent(self.bridge.send(&kind.rename_command(id, name))))
    }

    fn delete_node(&mut self, kind: NodeKind, id: &str) -> Result<Outcome, SyncError> {
        if !self.contains_node(kind, id) {
            return Err(SyncError::UnknownEntity(id.to_string()));
        }
        let in_flight = self.ledger.contains_temp(id);
        if in_flight {
            log::debug!("delete of {kind:?} {id} deferred until confirmed");
            self.deferred.entry(id.to_string()).or_default().delete = true;
        }
        self.remove_node(kind, id);
        if in_flight || self.temp_ids.is_temp(id) {
            return Ok(Outcome::local());
        }
        Ok(Outcome::sent(self.bridge.send(&kind.delete_command(id))))
    }

    /// Expand or collapse a group or workspace.
    pub fn set_expanded(&mut self, id: &str, expanded: bool) -> Result<(), SyncError> {
        if self.group(id).is_none() && self.workspace(id).is_none() {
            return Err(SyncError::UnknownEntity(id.to_string()));
        }
        if expanded {
            self.expanded.insert(id.to_string());
        } else {
            self.expanded.remove(id);
        }
        Ok(())
    }

    pub fn select_board(&mut self, id: Option<&str>) -> Result<(), SyncError> {
        if let Some(id) = id {
            if self.board(id).is_none() {
                return Err(SyncError::UnknownEntity(id.to_string()));
            }
        }
        self.selected_board = id.map(str::to_string);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Removal (cascading)
    // ---------------------------------------------------------------

    fn remove_node(&mut self, kind: NodeKind, id: &str) -> bool {
        match kind {
            NodeKind::Group => self.remove_group(id),
            NodeKind::Workspace => self.remove_workspace(id),
            NodeKind::Board => self.remove_board(id),
        }
    }

    fn remove_group(&mut self, id: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.id != id);
        if self.groups.len() == before {
            return false;
        }
        let children: Vec<String> = self
            .workspaces_in(id)
            .map(|w| w.id.clone())
            .collect();
        for ws in children {
            self.remove_workspace(&ws);
        }
        self.forget_node(id);
        true
    }

    fn remove_workspace(&mut self, id: &str) -> bool {
        let before = self.workspaces.len();
        self.workspaces.retain(|w| w.id != id);
        if self.workspaces.len() == before {
            return false;
        }
        let children: Vec<String> = self.boards_in(id).map(|b| b.id.clone()).collect();
        for board in children {
            self.remove_board(&board);
        }
        self.forget_node(id);
        true
    }

    fn remove_board(&mut self, id: &str) -> bool {
        let before = self.boards.len();
        self.boards.retain(|b| b.id != id);
        if self.boards.len() == before {
            return false;
        }
        self.forget_node(id);
        true
    }

    /// Drop bookkeeping keyed by a removed node. Its id stays seen so a late
    /// duplicate `*Created` cannot resurrect it. A node deleted while in
    /// flight keeps its ledger entry so the echo can be answered.
    fn forget_node(&mut self, id: &str) {
        self.expanded.remove(id);
        if self.selected_board.as_deref() == Some(id) {
            self.selected_board = None;
        }
        if !self.deferred.get(id).is_some_and(|edit| edit.delete) {
            self.deferred.remove(id);
            self.ledger.take_temp(id);
        }
    }

    // ---------------------------------------------------------------
    // Reconciliation
    // ---------------------------------------------------------------

    fn set_node_sync(&mut self, kind: NodeKind, id: &str, sync: SyncState) {
        let slot = match kind {
            NodeKind::Group => self.groups.iter_mut().find(|g| g.id == id).map(|g| &mut g.sync),
            NodeKind::Workspace => self
                .workspaces
                .iter_mut()
                .find(|w| w.id == id)
                .map(|w| &mut w.sync),
            NodeKind::Board => self.boards.iter_mut().find(|b| b.id == id).map(|b| &mut b.sync),
        };
        if let Some(slot) = slot {
            *slot = sync;
        }
    }

    fn set_node_name(&mut self, kind: NodeKind, id: &str, name: &str) -> bool {
        let slot = match kind {
            NodeKind::Group => self.groups.iter_mut().find(|g| g.id == id).map(|g| &mut g.name),
            NodeKind::Workspace => self
                .workspaces
                .iter_mut()
                .find(|w| w.id == id)
                .map(|w| &mut w.name),
            NodeKind::Board => self.boards.iter_mut().find(|b| b.id == id).map(|b| &mut b.name),
        };
        match slot {
            Some(slot) => {
                *slot = name.to_string();
                true
            }
            None => false,
        }
    }

    fn contains_node(&self, kind: NodeKind, id: &str) -> bool {
        match kind {
            NodeKind::Group => self.group(id).is_some(),
            NodeKind::Workspace => self.workspace(id).is_some(),
            NodeKind::Board => self.board(id).is_some(),
        }
    }

    fn node_fingerprint(&self, kind: NodeKind, id: &str) -> Option<Fingerprint> {
        match kind {
            NodeKind::Group => self.group(id).map(|g| group_fingerprint(&g.name)),
            NodeKind::Workspace => self
                .workspace(id)
                .map(|w| workspace_fingerprint(&w.group_id, &w.name)),
            NodeKind::Board => self
                .board(id)
                .map(|b| board_fingerprint(&b.workspace_id, &b.name)),
        }
    }

    fn node_ids(&self, kind: NodeKind) -> Vec<String> {
        match kind {
            NodeKind::Group => self.groups.iter().map(|g| g.id.clone()).collect(),
            NodeKind::Workspace => self.workspaces.iter().map(|w| w.id.clone()).collect(),
            NodeKind::Board => self.boards.iter().map(|b| b.id.clone()).collect(),
        }
    }

    /// Replay edits made while `temp_id` was in flight against the id the
    /// engine assigned.
    fn flush_deferred(&mut self, kind: NodeKind, temp_id: &str, confirmed_id: &str) {
        let Some(edit) = self.deferred.remove(temp_id) else {
            return;
        };
        if edit.delete {
            log::debug!("{kind:?} {temp_id} was deleted in flight; deleting {confirmed_id}");
            self.seen.mark(confirmed_id);
            self.remove_node(kind, confirmed_id);
            self.bridge.send(&kind.delete_command(confirmed_id));
        } else if let Some(name) = edit.rename {
            log::debug!("{kind:?} {temp_id} was renamed in flight; renaming {confirmed_id}");
            self.set_node_name(kind, confirmed_id, &name);
            self.bridge.send(&kind.rename_command(confirmed_id, name));
        }
    }

    /// Carry every reference to `temp_id` over to `confirmed_id`.
    fn rekey(&mut self, temp_id: &str, confirmed_id: &str) {
        if self.expanded.remove(temp_id) {
            self.expanded.insert(confirmed_id.to_string());
        }
        if self.selected_board.as_deref() == Some(temp_id) {
            self.selected_board = Some(confirmed_id.to_string());
        }
        for ws in self.workspaces.iter_mut().filter(|w| w.group_id == temp_id) {
            ws.group_id = confirmed_id.to_string();
        }
        for board in self.boards.iter_mut().filter(|b| b.workspace_id == temp_id) {
            board.workspace_id = confirmed_id.to_string();
        }
    }

    fn apply_group_created(&mut self, group: Group, client_ref: Option<&str>) {
        if !self.seen.mark(&group.id) {
            log::debug!("duplicate GroupCreated {}", group.id);
            return;
        }
        if let Some(op) = self.ledger.resolve(client_ref, group_fingerprint(&group.name)) {
            if let Some(local) = self.groups.iter_mut().find(|g| g.id == op.temp_id) {
                log::debug!("group {} confirmed as {}", op.temp_id, group.id);
                *local = group.clone();
                self.rekey(&op.temp_id, &group.id);
                self.flush_deferred(NodeKind::Group, &op.temp_id, &group.id);
                return;
            }
            if self.deferred.contains_key(&op.temp_id) {
                self.flush_deferred(NodeKind::Group, &op.temp_id, &group.id);
                return;
            }
        }
        if self.group(&group.id).is_none() {
            self.groups.push(group);
        }
    }

    fn apply_workspace_created(&mut self, workspace: Workspace, client_ref: Option<&str>) {
        if self.seen.contains(&workspace.id) {
            log::debug!("duplicate WorkspaceCreated {}", workspace.id);
            return;
        }
        if self.group(&workspace.group_id).is_none() {
            log::warn!(
                "dropping workspace {}: group {} is not in the tree",
                workspace.id,
                workspace.group_id
            );
            return;
        }
        self.seen.mark(&workspace.id);

        let fingerprint = workspace_fingerprint(&workspace.group_id, &workspace.name);
        if let Some(op) = self.ledger.resolve(client_ref, fingerprint) {
            if let Some(local) = self.workspaces.iter_mut().find(|w| w.id == op.temp_id) {
                log::debug!("workspace {} confirmed as {}", op.temp_id, workspace.id);
                *local = workspace.clone();
                self.rekey(&op.temp_id, &workspace.id);
                self.flush_deferred(NodeKind::Workspace, &op.temp_id, &workspace.id);
                return;
            }
            if self.deferred.contains_key(&op.temp_id) {
                self.flush_deferred(NodeKind::Workspace, &op.temp_id, &workspace.id);
                return;
            }
        }
        if self.workspace(&workspace.id).is_none() {
            self.workspaces.push(workspace);
        }
    }

    fn apply_board_created(&mut self, board: Board, client_ref: Option<&str>) {
        if self.seen.contains(&board.id) {
            log::debug!("duplicate BoardCreated {}", board.id);
            return;
        }
        if self.workspace(&board.workspace_id).is_none() {
            log::warn!(
                "dropping board {}: workspace {} is not in the tree",
                board.id,
                board.workspace_id
            );
            return;
        }
        self.seen.mark(&board.id);

        let fingerprint = board_fingerprint(&board.workspace_id, &board.name);
        if let Some(op) = self.ledger.resolve(client_ref, fingerprint) {
            if let Some(local) = self.boards.iter_mut().find(|b| b.id == op.temp_id) {
                log::debug!("board {} confirmed as {}", op.temp_id, board.id);
                *local = board.clone();
                self.rekey(&op.temp_id, &board.id);
                self.flush_deferred(NodeKind::Board, &op.temp_id, &board.id);
                return;
            }
            if self.deferred.contains_key(&op.temp_id) {
                self.flush_deferred(NodeKind::Board, &op.temp_id, &board.id);
                return;
            }
        }
        if self.board(&board.id).is_none() {
            self.boards.push(board);
        }
    }

    /// Replace confirmed state with an authoritative snapshot.
    ///
    /// Optimistic nodes survive when their parent still exists. A fresh
    /// snapshot node with the same fingerprint as a pending one is taken as
    /// its confirmation, since the echo for it will be deduplicated.
    fn apply_snapshot(&mut self, snapshot: TreeSnapshot) {
        let fresh: HashSet<String> = snapshot
            .groups
            .iter()
            .map(|g| g.id.clone())
            .chain(snapshot.workspaces.iter().map(|w| w.id.clone()))
            .chain(snapshot.boards.iter().map(|b| b.id.clone()))
            .filter(|id| !self.seen.contains(id))
            .collect();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut promoted: Vec<(NodeKind, String, String)> = Vec::new();
        let temp_ids = self.temp_ids.clone();

        let old_groups = std::mem::take(&mut self.groups);
        let old_workspaces = std::mem::take(&mut self.workspaces);
        let old_boards = std::mem::take(&mut self.boards);

        self.groups = snapshot
            .groups
            .into_iter()
            .map(|g| Group { sync: SyncState::Confirmed, ..g })
            .collect();

        for group in old_groups.into_iter().filter(|g| temp_ids.is_temp(&g.id)) {
            let fp = self.pending_fingerprint(&group.id, group_fingerprint(&group.name));
            let confirmed = self
                .groups
                .iter()
                .find(|g| fresh.contains(&g.id) && !claimed.contains(&g.id) && group_fingerprint(&g.name) == fp)
                .map(|g| g.id.clone());
            match confirmed {
                Some(id) => {
                    self.ledger.take_temp(&group.id);
                    self.rekey_bookkeeping(&group.id, &id);
                    claimed.insert(id.clone());
                    promoted.push((NodeKind::Group, group.id.clone(), id));
                }
                None => self.groups.push(group),
            }
        }

        let group_ids: HashSet<String> = self.groups.iter().map(|g| g.id.clone()).collect();
        let mut workspaces = Vec::with_capacity(snapshot.workspaces.len());
        for ws in snapshot.workspaces {
            if group_ids.contains(&ws.group_id) {
                workspaces.push(Workspace { sync: SyncState::Confirmed, ..ws });
            } else {
                log::warn!("snapshot workspace {} has no group {}; dropped", ws.id, ws.group_id);
            }
        }
        self.workspaces = workspaces;

        for ws in old_workspaces.into_iter().filter(|w| temp_ids.is_temp(&w.id)) {
            if !group_ids.contains(&ws.group_id) {
                self.ledger.take_temp(&ws.id);
                continue;
            }
            let fp = self.pending_fingerprint(&ws.id, workspace_fingerprint(&ws.group_id, &ws.name));
            let confirmed = self
                .workspaces
                .iter()
                .find(|w| {
                    fresh.contains(&w.id)
                        && !claimed.contains(&w.id)
                        && workspace_fingerprint(&w.group_id, &w.name) == fp
                })
                .map(|w| w.id.clone());
            match confirmed {
                Some(id) => {
                    self.ledger.take_temp(&ws.id);
                    self.rekey_bookkeeping(&ws.id, &id);
                    claimed.insert(id.clone());
                    promoted.push((NodeKind::Workspace, ws.id.clone(), id));
                }
                None => self.workspaces.push(ws),
            }
        }

        let workspace_ids: HashSet<String> = self.workspaces.iter().map(|w| w.id.clone()).collect();
        let mut boards = Vec::with_capacity(snapshot.boards.len());
        for board in snapshot.boards {
            if workspace_ids.contains(&board.workspace_id) {
                boards.push(Board { sync: SyncState::Confirmed, ..board });
            } else {
                log::warn!(
                    "snapshot board {} has no workspace {}; dropped",
                    board.id,
                    board.workspace_id
                );
            }
        }
        self.boards = boards;

        for board in old_boards.into_iter().filter(|b| temp_ids.is_temp(&b.id)) {
            if !workspace_ids.contains(&board.workspace_id) {
                self.ledger.take_temp(&board.id);
                continue;
            }
            let fp = self.pending_fingerprint(&board.id, board_fingerprint(&board.workspace_id, &board.name));
            let confirmed = self
                .boards
                .iter()
                .find(|b| {
                    fresh.contains(&b.id)
                        && !claimed.contains(&b.id)
                        && board_fingerprint(&b.workspace_id, &b.name) == fp
                })
                .map(|b| b.id.clone());
            match confirmed {
                Some(id) => {
                    self.ledger.take_temp(&board.id);
                    self.rekey_bookkeeping(&board.id, &id);
                    claimed.insert(id.clone());
                    promoted.push((NodeKind::Board, board.id.clone(), id));
                }
                None => self.boards.push(board),
            }
        }

        let confirmed_ids: Vec<String> = self
            .groups
            .iter()
            .map(|g| g.id.clone())
            .chain(self.workspaces.iter().map(|w| w.id.clone()))
            .chain(self.boards.iter().map(|b| b.id.clone()))
            .filter(|id| !temp_ids.is_temp(id))
            .collect();
        for id in &confirmed_ids {
            self.seen.mark(id);
        }

        // Nodes deleted in flight are gone locally; the snapshot may still
        // carry their confirmed copy.
        let in_flight_deletes: Vec<(String, NodeKind, Fingerprint)> = self
            .deferred
            .iter()
            .filter(|(_, edit)| edit.delete)
            .filter_map(|(temp_id, _)| {
                self.ledger
                    .get(temp_id)
                    .map(|op| (temp_id.clone(), op.entity, op.fingerprint))
            })
            .collect();
        for (temp_id, kind, fp) in in_flight_deletes {
            let confirmed = self.node_ids(kind).into_iter().find(|id| {
                fresh.contains(id)
                    && !claimed.contains(id)
                    && self.node_fingerprint(kind, id) == Some(fp)
            });
            if let Some(id) = confirmed {
                self.ledger.take_temp(&temp_id);
                claimed.insert(id.clone());
                promoted.push((kind, temp_id, id));
            }
        }
        for (kind, temp_id, confirmed_id) in promoted {
            self.flush_deferred(kind, &temp_id, &confirmed_id);
        }

        let expanded: HashSet<String> = self
            .expanded
            .iter()
            .filter(|id| group_ids.contains(*id) || workspace_ids.contains(*id))
            .cloned()
            .collect();
        self.expanded = expanded;
        if let Some(selected) = self.selected_board.clone() {
            if self.board(&selected).is_none() {
                self.selected_board = None;
            }
        }

        self.loaded = true;
        log::info!(
            "tree loaded: {} groups, {} workspaces, {} boards ({} pending)",
            self.groups.len(),
            self.workspaces.len(),
            self.boards.len(),
            self.ledger.len()
        );
    }

    /// Fingerprint the create was registered with; a local rename since
    /// then does not change what the engine will echo.
    fn pending_fingerprint(&self, temp_id: &str, current: Fingerprint) -> Fingerprint {
        self.ledger.get(temp_id).map_or(current, |op| op.fingerprint)
    }

    /// Like [`rekey`](Self::rekey) but only for expansion and selection,
    /// used while the node vectors are being rebuilt.
    fn rekey_bookkeeping(&mut self, temp_id: &str, confirmed_id: &str) {
        if self.expanded.remove(temp_id) {
            self.expanded.insert(confirmed_id.to_string());
        }
        if self.selected_board.as_deref() == Some(temp_id) {
            self.selected_board = Some(confirmed_id.to_string());
        }
    }
}

impl Store for TreeStore {
    type Protocol = FileTreeProtocol;

    fn bridge(&self) -> &Bridge<FileTreeProtocol> {
        &self.bridge
    }

    fn bridge_mut(&mut self) -> &mut Bridge<FileTreeProtocol> {
        &mut self.bridge
    }

    fn events(&mut self) -> &mut Subscription<TreeEvent> {
        &mut self.events
    }

    fn apply(&mut self, event: TreeEvent) {
        match event {
            TreeEvent::TreeLoaded { data } => match serde_json::from_str::<TreeSnapshot>(&data) {
                Ok(snapshot) => self.apply_snapshot(snapshot),
                Err(e) => {
                    log::warn!("[file_tree] unreadable TreeLoaded data: {e}");
                    self.last_error = Some(format!("invalid tree snapshot: {e}"));
                }
            },
            TreeEvent::GroupCreated { id, name, icon, color, owner_node_id, client_ref } => {
                let group = Group { id, name, icon, color, owner_node_id, sync: SyncState::Confirmed };
                self.apply_group_created(group, client_ref.as_deref());
            }
            TreeEvent::WorkspaceCreated { id, group_id, name, owner_node_id, client_ref } => {
                let workspace = Workspace { id, group_id, name, owner_node_id, sync: SyncState::Confirmed };
                self.apply_workspace_created(workspace, client_ref.as_deref());
            }
            TreeEvent::BoardCreated { id, workspace_id, name, board_type, owner_node_id, client_ref } => {
                let board = Board {
                    id,
                    workspace_id,
                    name,
                    board_type,
                    owner_node_id,
                    sync: SyncState::Confirmed,
                };
                self.apply_board_created(board, client_ref.as_deref());
            }
            TreeEvent::GroupRenamed { id, name } => {
                if let Some(group) = self.groups.iter_mut().find(|g| g.id == id) {
                    group.name = name;
                }
            }
            TreeEvent::WorkspaceRenamed { id, name } => {
                if let Some(ws) = self.workspaces.iter_mut().find(|w| w.id == id) {
                    ws.name = name;
                }
            }
            TreeEvent::BoardRenamed { id, name } => {
                if let Some(board) = self.boards.iter_mut().find(|b| b.id == id) {
                    board.name = name;
                }
            }
            TreeEvent::GroupDeleted { id } => {
                self.seen.mark(&id);
                self.remove_group(&id);
            }
            TreeEvent::WorkspaceDeleted { id } => {
                self.seen.mark(&id);
                self.remove_workspace(&id);
            }
            TreeEvent::BoardDeleted { id } => {
                self.seen.mark(&id);
                self.remove_board(&id);
            }
            TreeEvent::Error { message } => {
                log::error!("[file_tree] engine error: {message}");
                self.last_error = Some(message);
            }
            TreeEvent::Unknown => log::debug!("[file_tree] ignoring unknown event"),
        }
    }

    fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.ledger.expire(now);
        for op in &expired {
            log::warn!("{:?} {} was never confirmed", op.entity, op.temp_id);
            self.deferred.remove(&op.temp_id);
            self.set_node_sync(op.entity, &op.temp_id, SyncState::Unconfirmed);
        }
        expired.len()
    }
}
