//! Workspace chat, scoped to one workspace or every workspace of a group.

use std::collections::BTreeSet;
use std::time::Instant;

use cyan_core::protocol::{ChatCommand, ChatEvent, ChatProtocol};
use cyan_core::{now_millis, ChatMessage, SyncState, WireMessage};

use super::{MessageLog, Outcome, Store};
use crate::bridge::{Bridge, Subscription};
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ledger::{Fingerprint, PendingLedger, SeenIds, TempIds};

/// Which workspaces the chat panel is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Workspace(String),
    Group {
        group_id: String,
        workspace_ids: BTreeSet<String>,
    },
}

impl ChatScope {
    pub fn contains(&self, workspace_id: &str) -> bool {
        match self {
            ChatScope::Workspace(id) => id == workspace_id,
            ChatScope::Group { workspace_ids, .. } => workspace_ids.contains(workspace_id),
        }
    }

    pub fn workspace_ids(&self) -> Vec<&str> {
        match self {
            ChatScope::Workspace(id) => vec![id.as_str()],
            ChatScope::Group { workspace_ids, .. } => {
                workspace_ids.iter().map(String::as_str).collect()
            }
        }
    }
}

fn message_fingerprint(workspace_id: &str, author: &str, body: &str) -> Fingerprint {
    Fingerprint::of(&[workspace_id, author, body])
}

pub struct ChatStore {
    bridge: Bridge<ChatProtocol>,
    events: Subscription<ChatEvent>,
    local_author: String,
    scope: Option<ChatScope>,
    log: MessageLog,
    /// Entity is the workspace the message was sent to.
    ledger: PendingLedger<String>,
    seen: SeenIds,
    temp_ids: TempIds,
    last_error: Option<String>,
}

impl ChatStore {
    pub fn new(channel: Channel, config: &SyncConfig, local_author: impl Into<String>) -> Self {
        let bridge = Bridge::new(channel, config.bridge());
        let events = bridge.subscribe();
        Self {
            bridge,
            events,
            local_author: local_author.into(),
            scope: None,
            log: MessageLog::new(),
            ledger: PendingLedger::new(config.pending_timeout),
            seen: SeenIds::new(),
            temp_ids: TempIds::new("temp_"),
            last_error: None,
        }
    }

    pub fn scope(&self) -> Option<&ChatScope> {
        self.scope.as_ref()
    }

    pub fn in_scope(&self, workspace_id: &str) -> bool {
        self.scope.as_ref().is_some_and(|s| s.contains(workspace_id))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.as_slice()
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.log.get(id)
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Switch scope. The log and pending ledger start over and history is
    /// requested for every workspace in the new scope. Seen ids are kept.
    pub fn set_scope(&mut self, scope: ChatScope) -> Outcome {
        log::debug!("chat scope -> {scope:?}");
        self.log.clear();
        self.ledger.clear();
        self.scope = Some(scope);
        self.reload()
    }

    /// Clear the scope; every chat event is ignored until a new one is set.
    pub fn clear_scope(&mut self) {
        self.scope = None;
        self.log.clear();
        self.ledger.clear();
    }

    /// Re-request history for the current scope.
    pub fn reload(&self) -> Outcome {
        let Some(scope) = &self.scope else {
            return Outcome::local();
        };
        let mut delivered = true;
        for workspace_id in scope.workspace_ids() {
            delivered &= self.bridge.send(&ChatCommand::LoadChatHistory {
                workspace_id: workspace_id.to_string(),
            });
        }
        Outcome::sent(delivered)
    }

    pub fn send_message(
        &mut self,
        workspace_id: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> Result<Outcome, SyncError> {
        if !self.in_scope(workspace_id) {
            return Err(SyncError::OutOfScope(workspace_id.to_string()));
        }
        if body.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let temp_id = self.temp_ids.next_id();
        self.log.insert_optimistic(ChatMessage {
            id: temp_id.clone(),
            author: self.local_author.clone(),
            body: body.to_string(),
            workspace_id: Some(workspace_id.to_string()),
            parent_id: parent_id.map(str::to_string),
            timestamp: now_millis(),
            sync: SyncState::Pending,
        });
        let nonce = self.ledger.register(
            temp_id.clone(),
            message_fingerprint(workspace_id, &self.local_author, body),
            workspace_id.to_string(),
            Instant::now(),
        );

        let delivered = self.bridge.send(&ChatCommand::SendChat {
            workspace_id: workspace_id.to_string(),
            message: body.to_string(),
            parent_id: parent_id.map(str::to_string),
            client_ref: Some(nonce),
        });
        if !delivered {
            log::warn!("[chat_panel] send rejected; {temp_id} left unconfirmed");
            self.log.set_sync(&temp_id, SyncState::Unconfirmed);
        }
        Ok(Outcome::created(temp_id, delivered))
    }

    pub fn delete_message(&mut self, id: &str) -> Result<Outcome, SyncError> {
        if self.ledger.contains_temp(id) {
            return Err(SyncError::Unconfirmed(id.to_string()));
        }
        if self.log.remove(id).is_none() {
            return Err(SyncError::UnknownEntity(id.to_string()));
        }
        if self.temp_ids.is_temp(id) {
            return Ok(Outcome::local());
        }
        self.seen.mark(id);
        Ok(Outcome::sent(
            self.bridge.send(&ChatCommand::DeleteChat { id: id.to_string() }),
        ))
    }

    fn reconcile(&mut self, message: ChatMessage, client_ref: Option<&str>) {
        let workspace_id = message.workspace_id.clone().unwrap_or_default();
        let fingerprint = message_fingerprint(&workspace_id, &message.author, &message.body);
        if let Some(op) = self.ledger.resolve(client_ref, fingerprint) {
            if self.log.promote(&op.temp_id, &message.id) {
                log::debug!("chat {} confirmed as {}", op.temp_id, message.id);
                return;
            }
        }
        self.log.insert_confirmed(message);
    }

    /// History carries no `client_ref`, so a pending send is only taken as
    /// answered by a message stamped no earlier than the send itself.
    fn reconcile_history(&mut self, message: ChatMessage) {
        let workspace_id = message.workspace_id.clone().unwrap_or_default();
        let fingerprint = message_fingerprint(&workspace_id, &message.author, &message.body);
        let entries = &self.log;
        let resolved = self.ledger.resolve_matching(fingerprint, |op| {
            entries
                .get(&op.temp_id)
                .is_some_and(|local| local.timestamp <= message.timestamp)
        });
        if let Some(op) = resolved {
            if self.log.promote(&op.temp_id, &message.id) {
                log::debug!("chat {} confirmed from history as {}", op.temp_id, message.id);
                return;
            }
        }
        self.log.insert_confirmed(message);
    }

    fn apply_history(&mut self, workspace_id: String, messages: Vec<WireMessage>) {
        if !self.in_scope(&workspace_id) {
            log::debug!("[chat_panel] history for out-of-scope workspace {workspace_id}");
            return;
        }
        let count = messages.len();
        for wire in messages {
            self.seen.mark(&wire.id);
            if self.log.contains(&wire.id) {
                continue;
            }
            let mut message = ChatMessage::from(wire);
            message.workspace_id = Some(workspace_id.clone());
            self.reconcile_history(message);
        }
        log::debug!("[chat_panel] {count} history messages for {workspace_id}");
    }
}

impl Store for ChatStore {
    type Protocol = ChatProtocol;

    fn bridge(&self) -> &Bridge<ChatProtocol> {
        &self.bridge
    }

    fn bridge_mut(&mut self) -> &mut Bridge<ChatProtocol> {
        &mut self.bridge
    }

    fn events(&mut self) -> &mut Subscription<ChatEvent> {
        &mut self.events
    }

    fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::ChatSent {
                id,
                workspace_id,
                author,
                message,
                parent_id,
                timestamp,
                client_ref,
            } => {
                if !self.seen.mark(&id) {
                    log::debug!("duplicate ChatSent {id}");
                    // History may have delivered the id before our echo.
                    let fingerprint = message_fingerprint(&workspace_id, &author, &message);
                    if let Some(op) = client_ref
                        .as_deref()
                        .and_then(|nonce| self.ledger.resolve(Some(nonce), fingerprint))
                    {
                        self.log.promote(&op.temp_id, &id);
                    }
                    return;
                }
                if !self.in_scope(&workspace_id) {
                    return;
                }
                let message = ChatMessage {
                    id,
                    author,
                    body: message,
                    workspace_id: Some(workspace_id),
                    parent_id,
                    timestamp,
                    sync: SyncState::Confirmed,
                };
                self.reconcile(message, client_ref.as_deref());
            }
            ChatEvent::ChatHistory { workspace_id, messages } => {
                self.apply_history(workspace_id, messages);
            }
            ChatEvent::ChatDeleted { id } => {
                self.seen.mark(&id);
                self.log.remove(&id);
            }
            ChatEvent::Error { message } => {
                log::error!("[chat_panel] engine error: {message}");
                self.last_error = Some(message);
            }
            ChatEvent::Unknown => log::debug!("[chat_panel] ignoring unknown event"),
        }
    }

    fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.ledger.expire(now);
        for op in &expired {
            log::warn!("chat message {} in {} was never confirmed", op.temp_id, op.entity);
            self.log.set_sync(&op.temp_id, SyncState::Unconfirmed);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EngineLink;
    use crate::engine::MemoryEngine;
    use cyan_core::protocol::Subsystem;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> (Arc<MemoryEngine>, ChatStore) {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let channel = link.open_channel(Subsystem::CHAT_PANEL).unwrap();
        (engine, ChatStore::new(channel, &SyncConfig::default(), "me"))
    }

    fn chat_sent(id: &str, workspace_id: &str, author: &str, body: &str, ts: i64) -> ChatEvent {
        ChatEvent::ChatSent {
            id: id.into(),
            workspace_id: workspace_id.into(),
            author: author.into(),
            message: body.into(),
            parent_id: None,
            timestamp: ts,
            client_ref: None,
        }
    }

    fn wire(id: &str, author: &str, body: &str, ts: i64) -> WireMessage {
        WireMessage {
            id: id.into(),
            author: author.into(),
            message: body.into(),
            workspace_id: None,
            parent_id: None,
            timestamp: ts,
        }
    }

    #[test]
    fn test_set_scope_requests_history_per_workspace() {
        let (engine, mut store) = store();
        let scope = ChatScope::Group {
            group_id: "g1".into(),
            workspace_ids: ["w1".to_string(), "w2".to_string()].into_iter().collect(),
        };
        assert!(store.set_scope(scope).delivered);

        let sent: Vec<ChatCommand> = engine.sent_commands(Subsystem::CHAT_PANEL);
        assert_eq!(
            sent,
            vec![
                ChatCommand::LoadChatHistory { workspace_id: "w1".into() },
                ChatCommand::LoadChatHistory { workspace_id: "w2".into() },
            ]
        );
    }

    #[test]
    fn test_send_requires_scope_and_body() {
        let (_engine, mut store) = store();
        assert_eq!(
            store.send_message("w1", "hi", None).unwrap_err(),
            SyncError::OutOfScope("w1".into())
        );
        store.set_scope(ChatScope::Workspace("w1".into()));
        assert_eq!(store.send_message("w1", "  ", None).unwrap_err(), SyncError::EmptyMessage);
    }

    #[test]
    fn test_echo_promotes_in_place() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        store.apply(chat_sent("m1", "w1", "alice", "before", 1));

        let outcome = store.send_message("w1", "hello", None).unwrap();
        let temp_id = outcome.temp_id.unwrap();
        assert_eq!(store.message(&temp_id).unwrap().sync, SyncState::Pending);
        let local_ts = store.message(&temp_id).unwrap().timestamp;

        store.apply(chat_sent("m-99", "w1", "me", "hello", local_ts + 500));

        assert_eq!(store.messages().len(), 2);
        let promoted = store.message("m-99").unwrap();
        assert_eq!(promoted.sync, SyncState::Confirmed);
        assert_eq!(promoted.timestamp, local_ts);
        assert!(store.message(&temp_id).is_none());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_identical_sends_resolve_in_order() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        let first = store.send_message("w1", "ok", None).unwrap().temp_id.unwrap();
        let second = store.send_message("w1", "ok", None).unwrap().temp_id.unwrap();
        assert_eq!(store.pending_count(), 2);

        store.apply(chat_sent("m1", "w1", "me", "ok", 10));
        assert!(store.message(&first).is_none());
        assert!(store.message(&second).is_some());

        store.apply(chat_sent("m2", "w1", "me", "ok", 11));
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_and_out_of_scope_events() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));

        store.apply(chat_sent("m1", "w1", "alice", "hi", 1));
        store.apply(chat_sent("m1", "w1", "alice", "hi", 1));
        store.apply(chat_sent("m2", "w2", "bob", "elsewhere", 2));

        let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1"]);

        // Already seen globally, so it stays out even after switching scope.
        store.set_scope(ChatScope::Workspace("w2".into()));
        store.apply(chat_sent("m2", "w2", "bob", "elsewhere", 2));
        assert!(store.messages().is_empty());
    }

    #[test]
    fn test_history_is_sorted_and_deduplicated() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        store.apply(chat_sent("m2", "w1", "bob", "second", 20));
        store.apply(ChatEvent::ChatHistory {
            workspace_id: "w1".into(),
            messages: vec![
                wire("m3", "carol", "third", 30),
                wire("m1", "alice", "first", 10),
                wire("m2", "bob", "second", 20),
            ],
        });

        let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(store.message("m1").unwrap().workspace_id.as_deref(), Some("w1"));

        store.apply(ChatEvent::ChatHistory {
            workspace_id: "w9".into(),
            messages: vec![wire("m9", "x", "y", 1)],
        });
        assert_eq!(store.messages().len(), 3);
    }

    #[test]
    fn test_older_history_message_does_not_take_over_pending_send() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        let temp_id = store.send_message("w1", "ok", None).unwrap().temp_id.unwrap();
        let local_ts = store.message(&temp_id).unwrap().timestamp;

        store.apply(ChatEvent::ChatHistory {
            workspace_id: "w1".into(),
            messages: vec![wire("m-old", "me", "ok", 10), wire("m-new", "me", "ok", local_ts + 5)],
        });

        let thread: Vec<(&str, i64)> =
            store.messages().iter().map(|m| (m.id.as_str(), m.timestamp)).collect();
        assert_eq!(thread, vec![("m-old", 10), ("m-new", local_ts)]);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_echo_after_history_clears_pending_copy() {
        let (engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        store.send_message("w1", "hello", None).unwrap();
        let nonce = match engine.sent_commands::<ChatCommand>(Subsystem::CHAT_PANEL).pop() {
            Some(ChatCommand::SendChat { client_ref, .. }) => client_ref,
            other => panic!("unexpected {other:?}"),
        };

        store.apply(ChatEvent::ChatHistory {
            workspace_id: "w1".into(),
            messages: vec![wire("m-1", "me", "hello", 5)],
        });
        assert_eq!(store.messages().len(), 2);

        store.apply(ChatEvent::ChatSent {
            id: "m-1".into(),
            workspace_id: "w1".into(),
            author: "me".into(),
            message: "hello".into(),
            parent_id: None,
            timestamp: 5,
            client_ref: nonce,
        });

        let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m-1"]);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_delete_message() {
        let (engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        store.apply(chat_sent("m1", "w1", "alice", "hi", 1));
        let temp_id = store.send_message("w1", "pending", None).unwrap().temp_id.unwrap();

        assert_eq!(
            store.delete_message(&temp_id).unwrap_err(),
            SyncError::Unconfirmed(temp_id.clone())
        );
        assert!(store.delete_message("m1").unwrap().delivered);
        assert!(store.message("m1").is_none());

        let sent: Vec<ChatCommand> = engine.sent_commands(Subsystem::CHAT_PANEL);
        assert_eq!(sent.last(), Some(&ChatCommand::DeleteChat { id: "m1".into() }));

        store.apply(ChatEvent::ChatDeleted { id: "m1".into() });
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_expired_message_stays_unconfirmed() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        let temp_id = store.send_message("w1", "lost", None).unwrap().temp_id.unwrap();

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(store.expire_pending(later), 1);
        assert_eq!(store.message(&temp_id).unwrap().sync, SyncState::Unconfirmed);

        // No longer in flight: a local discard is allowed.
        assert_eq!(store.delete_message(&temp_id).unwrap(), Outcome::local());
        assert!(store.messages().is_empty());
    }

    #[test]
    fn test_error_event_keeps_optimistic_message() {
        let (_engine, mut store) = store();
        store.set_scope(ChatScope::Workspace("w1".into()));
        store.send_message("w1", "hello", None).unwrap();
        store.apply(ChatEvent::Error { message: "send failed".into() });

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.last_error(), Some("send failed"));
    }
}
