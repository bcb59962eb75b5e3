//! Direct messages over the `network` subsystem, one log per peer.
//!
//! Conversation summaries are derived data: they are rebuilt from the logs
//! and read marks after every change instead of being patched in place.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use cyan_core::protocol::{NetworkCommand, NetworkEvent, NetworkProtocol};
use cyan_core::{now_millis, ChatMessage, ConversationSummary, SyncState, WireMessage};

use super::{MessageLog, Outcome, Store};
use crate::bridge::{Bridge, Subscription};
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ledger::{Fingerprint, PendingLedger, SeenIds, TempIds};

fn dm_fingerprint(peer_id: &str, author: &str, body: &str) -> Fingerprint {
    Fingerprint::of(&[peer_id, author, body])
}

pub struct DirectMessageStore {
    bridge: Bridge<NetworkProtocol>,
    events: Subscription<NetworkEvent>,
    local_id: String,
    logs: BTreeMap<String, MessageLog>,
    /// Unix millis up to which each conversation has been read.
    read_marks: HashMap<String, i64>,
    summaries: Vec<ConversationSummary>,
    active_peer: Option<String>,
    /// Entity is the peer id.
    ledger: PendingLedger<String>,
    seen: SeenIds,
    temp_ids: TempIds,
    last_error: Option<String>,
}

impl DirectMessageStore {
    pub fn new(channel: Channel, config: &SyncConfig, local_id: impl Into<String>) -> Self {
        let bridge = Bridge::new(channel, config.bridge());
        let events = bridge.subscribe();
        Self {
            bridge,
            events,
            local_id: local_id.into(),
            logs: BTreeMap::new(),
            read_marks: HashMap::new(),
            summaries: Vec::new(),
            active_peer: None,
            ledger: PendingLedger::new(config.pending_timeout),
            seen: SeenIds::new(),
            temp_ids: TempIds::new("temp_"),
            last_error: None,
        }
    }

    /// Conversations, most recent first.
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn conversation(&self, peer_id: &str) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| s.peer_id == peer_id)
    }

    pub fn messages(&self, peer_id: &str) -> &[ChatMessage] {
        self.logs
            .get(peer_id)
            .map(MessageLog::as_slice)
            .unwrap_or_default()
    }

    pub fn total_unread(&self) -> usize {
        self.summaries.iter().map(|s| s.unread_count).sum()
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active_peer.as_deref()
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

    pub fn load(&self, peer_id: &str) -> bool {
        self.bridge.send(&NetworkCommand::LoadDirectMessages {
            peer_id: peer_id.to_string(),
        })
    }

    /// Make `peer_id` the visible conversation: load its history and mark it read.
    pub fn open(&mut self, peer_id: &str) -> Outcome {
        self.active_peer = Some(peer_id.to_string());
        self.logs.entry(peer_id.to_string()).or_default();
        let loaded = self.load(peer_id);
        let read = self.mark_read(peer_id);
        Outcome::sent(loaded && read.delivered)
    }

    pub fn close(&mut self) {
        self.active_peer = None;
    }

    pub fn mark_read(&mut self, peer_id: &str) -> Outcome {
        let latest = self
            .logs
            .get(peer_id)
            .and_then(MessageLog::last)
            .map_or(0, |m| m.timestamp);
        self.advance_read_mark(peer_id, latest.max(now_millis()));
        self.refresh_summaries();
        Outcome::sent(self.bridge.send(&NetworkCommand::MarkConversationRead {
            peer_id: peer_id.to_string(),
        }))
    }

    pub fn send(&mut self, peer_id: &str, body: &str) -> Result<Outcome, SyncError> {
        if body.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let temp_id = self.temp_ids.next_id();
        let timestamp = now_millis();
        self.logs
            .entry(peer_id.to_string())
            .or_default()
            .insert_optimistic(ChatMessage {
                id: temp_id.clone(),
                author: self.local_id.clone(),
                body: body.to_string(),
                workspace_id: None,
                parent_id: None,
                timestamp,
                sync: SyncState::Pending,
            });
        let nonce = self.ledger.register(
            temp_id.clone(),
            dm_fingerprint(peer_id, &self.local_id, body),
            peer_id.to_string(),
            Instant::now(),
        );

        let delivered = self.bridge.send(&NetworkCommand::SendDirectMessage {
            peer_id: peer_id.to_string(),
            message: body.to_string(),
            client_ref: Some(nonce),
        });
        if !delivered {
            log::warn!("[network] direct message to {peer_id} rejected");
            self.set_sync(peer_id, &temp_id, SyncState::Unconfirmed);
        }
        self.refresh_summaries();
        Ok(Outcome::created(temp_id, delivered))
    }

    fn set_sync(&mut self, peer_id: &str, id: &str, sync: SyncState) {
        if let Some(thread) = self.logs.get_mut(peer_id) {
            thread.set_sync(id, sync);
        }
    }

    fn advance_read_mark(&mut self, peer_id: &str, at: i64) {
        let mark = self.read_marks.entry(peer_id.to_string()).or_insert(i64::MIN);
        *mark = (*mark).max(at);
    }

    fn reconcile(&mut self, peer_id: &str, message: ChatMessage, client_ref: Option<&str>) {
        let fingerprint = dm_fingerprint(peer_id, &message.author, &message.body);
        let thread = self.logs.entry(peer_id.to_string()).or_default();
        if let Some(op) = self.ledger.resolve(client_ref, fingerprint) {
            if thread.promote(&op.temp_id, &message.id) {
                log::debug!("dm {} confirmed as {}", op.temp_id, message.id);
                return;
            }
        }
        thread.insert_confirmed(message);
    }

    /// History carries no `client_ref`, so a pending send is only taken as
    /// answered by a message stamped no earlier than the send itself.
    fn reconcile_history(&mut self, peer_id: &str, message: ChatMessage) {
        let fingerprint = dm_fingerprint(peer_id, &message.author, &message.body);
        let thread = self.logs.entry(peer_id.to_string()).or_default();
        let resolved = self.ledger.resolve_matching(fingerprint, |op| {
            thread
                .get(&op.temp_id)
                .is_some_and(|local| local.timestamp <= message.timestamp)
        });
        if let Some(op) = resolved {
            if thread.promote(&op.temp_id, &message.id) {
                log::debug!("dm {} confirmed from history as {}", op.temp_id, message.id);
                return;
            }
        }
        thread.insert_confirmed(message);
    }

    fn apply_history(&mut self, peer_id: &str, messages: Vec<WireMessage>) {
        for wire in messages {
            self.seen.mark(&wire.id);
            if self.logs.get(peer_id).is_some_and(|t| t.contains(&wire.id)) {
                continue;
            }
            self.reconcile_history(peer_id, ChatMessage::from(wire));
        }
        if self.active_peer.as_deref() == Some(peer_id) {
            let latest = self.logs.get(peer_id).and_then(MessageLog::last).map(|m| m.timestamp);
            if let Some(latest) = latest {
                self.advance_read_mark(peer_id, latest);
            }
        }
    }

    fn unread_in(&self, peer_id: &str, thread: &MessageLog) -> usize {
        let mark = self.read_marks.get(peer_id).copied().unwrap_or(i64::MIN);
        thread
            .as_slice()
            .iter()
            .filter(|m| m.author != self.local_id && m.timestamp > mark)
            .count()
    }

    fn refresh_summaries(&mut self) {
        let mut summaries: Vec<ConversationSummary> = self
            .logs
            .iter()
            .map(|(peer_id, thread)| ConversationSummary {
                peer_id: peer_id.clone(),
                unread_count: self.unread_in(peer_id, thread),
                last_message: thread.last().map(|m| m.body.clone()),
                last_message_time: thread.last().map(|m| m.timestamp),
            })
            .collect();
        // Newest first; empty conversations last; peer id breaks ties.
        summaries.sort_by(|a, b| {
            b.last_message_time
                .cmp(&a.last_message_time)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        self.summaries = summaries;
    }
}

impl Store for DirectMessageStore {
    type Protocol = NetworkProtocol;

    fn bridge(&self) -> &Bridge<NetworkProtocol> {
        &self.bridge
    }

    fn bridge_mut(&mut self) -> &mut Bridge<NetworkProtocol> {
        &mut self.bridge
    }

    fn events(&mut self) -> &mut Subscription<NetworkEvent> {
        &mut self.events
    }

    fn apply(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::DirectMessage {
                id,
                peer_id,
                author,
                message,
                timestamp,
                client_ref,
            } => {
                if !self.seen.mark(&id) {
                    log::debug!("duplicate DirectMessage {id}");
                    // History may have delivered the id before our echo.
                    let fingerprint = dm_fingerprint(&peer_id, &author, &message);
                    if let Some(op) = client_ref
                        .as_deref()
                        .and_then(|nonce| self.ledger.resolve(Some(nonce), fingerprint))
                    {
                        if let Some(thread) = self.logs.get_mut(&peer_id) {
                            thread.promote(&op.temp_id, &id);
                        }
                        self.refresh_summaries();
                    }
                    return;
                }
                let incoming = author != self.local_id;
                let message = ChatMessage {
                    id,
                    author,
                    body: message,
                    workspace_id: None,
                    parent_id: None,
                    timestamp,
                    sync: SyncState::Confirmed,
                };
                self.reconcile(&peer_id, message, client_ref.as_deref());
                if incoming && self.active_peer.as_deref() == Some(peer_id.as_str()) {
                    self.advance_read_mark(&peer_id, timestamp);
                }
            }
            NetworkEvent::DirectHistory { peer_id, messages } => {
                self.apply_history(&peer_id, messages);
            }
            NetworkEvent::ConversationRead { peer_id, read_at } => {
                self.advance_read_mark(&peer_id, read_at);
            }
            NetworkEvent::Error { message } => {
                log::error!("[network] engine error: {message}");
                self.last_error = Some(message);
            }
            NetworkEvent::Unknown => {
                log::debug!("[network] ignoring unknown event");
                return;
            }
        }
        self.refresh_summaries();
    }

    fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.ledger.expire(now);
        for op in &expired {
            log::warn!("direct message {} to {} was never confirmed", op.temp_id, op.entity);
            self.set_sync(&op.entity, &op.temp_id, SyncState::Unconfirmed);
        }
        expired.len()
    }
}
