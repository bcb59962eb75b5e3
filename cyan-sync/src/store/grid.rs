//! Board grid for one workspace: ratings, labels and deletion.
//!
//! Metadata edits are optimistic and keyed by board id. While an edit for a
//! board is in flight, engine values for that board are held back so a stale
//! listing cannot overwrite the local change; once nothing is pending the
//! engine's value wins.

use std::time::Instant;

use cyan_core::protocol::{GridCommand, GridEvent, GridProtocol};
use cyan_core::{BoardCard, BoardMetadata, SyncState};

use super::{Outcome, Store};
use crate::bridge::{Bridge, Subscription};
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ledger::{Fingerprint, PendingLedger, SeenIds};

pub const MAX_RATING: u8 = 5;

fn metadata_fingerprint(id: &str, rating: u8, labels: &[String]) -> Fingerprint {
    let rating = rating.to_string();
    let labels = labels.join("\u{1f}");
    Fingerprint::of(&[id, &rating, &labels])
}

/// Trim, drop empties and remove repeats, keeping first occurrence order.
fn normalize_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}

pub struct BoardGridStore {
    bridge: Bridge<GridProtocol>,
    events: Subscription<GridEvent>,
    workspace_id: Option<String>,
    cards: Vec<BoardCard>,
    /// Keyed by board id; entity is the board id as well.
    ledger: PendingLedger<String>,
    tombstones: SeenIds,
    loaded: bool,
    last_error: Option<String>,
}

impl BoardGridStore {
    pub fn new(channel: Channel, config: &SyncConfig) -> Self {
        let bridge = Bridge::new(channel, config.bridge());
        let events = bridge.subscribe();
        Self {
            bridge,
            events,
            workspace_id: None,
            cards: Vec::new(),
            ledger: PendingLedger::new(config.pending_timeout),
            tombstones: SeenIds::new(),
            loaded: false,
            last_error: None,
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn boards(&self) -> &[BoardCard] {
        &self.cards
    }

    pub fn board(&self, id: &str) -> Option<&BoardCard> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
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

    /// Show the grid for `workspace_id` and request its boards.
    pub fn set_workspace(&mut self, workspace_id: &str) -> bool {
        if self.workspace_id.as_deref() != Some(workspace_id) {
            self.workspace_id = Some(workspace_id.to_string());
            self.cards.clear();
            self.ledger.clear();
            self.loaded = false;
        }
        self.load()
    }

    /// Re-request the current workspace's boards; `false` without a scope.
    pub fn load(&self) -> bool {
        match &self.workspace_id {
            Some(workspace_id) => self.bridge.send(&GridCommand::LoadBoards {
                workspace_id: workspace_id.clone(),
            }),
            None => false,
        }
    }

    pub fn set_rating(&mut self, id: &str, rating: u8) -> Result<Outcome, SyncError> {
        let rating = rating.min(MAX_RATING);
        let card = self.card_mut(id)?;
        card.rating = rating;
        card.sync = SyncState::Pending;
        let fingerprint = metadata_fingerprint(id, rating, &card.labels);

        self.ledger
            .register(id, fingerprint, id.to_string(), Instant::now());
        let delivered = self.bridge.send(&GridCommand::SetBoardRating {
            id: id.to_string(),
            rating,
        });
        self.after_edit(id, delivered);
        Ok(Outcome::sent(delivered))
    }

    pub fn set_labels(&mut self, id: &str, labels: &[String]) -> Result<Outcome, SyncError> {
        let labels = normalize_labels(labels);
        let card = self.card_mut(id)?;
        card.labels = labels.clone();
        card.sync = SyncState::Pending;
        let fingerprint = metadata_fingerprint(id, card.rating, &labels);

        self.ledger
            .register(id, fingerprint, id.to_string(), Instant::now());
        let delivered = self.bridge.send(&GridCommand::SetBoardLabels {
            id: id.to_string(),
            labels,
        });
        self.after_edit(id, delivered);
        Ok(Outcome::sent(delivered))
    }

    /// Remove a board from the grid immediately; it stays gone even if a
    /// later listing still carries it.
    pub fn delete_board(&mut self, id: &str) -> Result<Outcome, SyncError> {
        if !self.remove_card(id) {
            return Err(SyncError::UnknownEntity(id.to_string()));
        }
        Ok(Outcome::sent(
            self.bridge.send(&GridCommand::DeleteBoard { id: id.to_string() }),
        ))
    }

    fn card_mut(&mut self, id: &str) -> Result<&mut BoardCard, SyncError> {
        self.cards
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SyncError::UnknownEntity(id.to_string()))
    }

    fn after_edit(&mut self, id: &str, delivered: bool) {
        if !delivered {
            log::warn!("[board_grid] edit for {id} rejected");
            if let Ok(card) = self.card_mut(id) {
                card.sync = SyncState::Unconfirmed;
            }
        }
    }

    fn has_pending(&self, id: &str) -> bool {
        self.ledger.iter().any(|op| op.entity == id)
    }

    fn remove_card(&mut self, id: &str) -> bool {
        self.tombstones.mark(id);
        self.ledger.retain(|op| op.entity != id);
        let before = self.cards.len();
        self.cards.retain(|c| c.id != id);
        self.cards.len() != before
    }

    fn apply_listing(&mut self, workspace_id: String, boards: Vec<BoardMetadata>) {
        if self.workspace_id.as_deref() != Some(workspace_id.as_str()) {
            log::debug!("[board_grid] ignoring listing for {workspace_id}");
            return;
        }
        let previous = std::mem::take(&mut self.cards);
        let mut cards = Vec::with_capacity(boards.len());
        for meta in boards {
            if self.tombstones.contains(&meta.id) {
                continue;
            }
            let mut card = BoardCard::from(meta);
            if self.has_pending(&card.id) {
                if let Some(local) = previous.iter().find(|c| c.id == card.id) {
                    card.rating = local.rating;
                    card.labels = local.labels.clone();
                    card.sync = local.sync;
                }
            }
            cards.push(card);
        }
        // Pending edits on boards the listing no longer has are moot.
        self.ledger
            .retain(|op| cards.iter().any(|c| c.id == op.entity));
        self.cards = cards;
        self.loaded = true;
        log::debug!("[board_grid] {} boards in {workspace_id}", self.cards.len());
    }

    fn apply_metadata(&mut self, id: String, rating: u8, labels: Vec<String>) {
        if self.tombstones.contains(&id) {
            return;
        }
        let fingerprint = metadata_fingerprint(&id, rating, &labels);
        let confirmed = self.ledger.resolve(None, fingerprint).is_some();
        if self.has_pending(&id) {
            log::debug!("[board_grid] holding engine metadata for {id}: edits in flight");
            return;
        }
        if let Ok(card) = self.card_mut(&id) {
            card.rating = rating.min(MAX_RATING);
            card.labels = labels;
            card.sync = SyncState::Confirmed;
            if confirmed {
                log::debug!("[board_grid] metadata for {id} confirmed");
            }
        }
    }
}

impl Store for BoardGridStore {
    type Protocol = GridProtocol;

    fn bridge(&self) -> &Bridge<GridProtocol> {
        &self.bridge
    }

    fn bridge_mut(&mut self) -> &mut Bridge<GridProtocol> {
        &mut self.bridge
    }

    fn events(&mut self) -> &mut Subscription<GridEvent> {
        &mut self.events
    }

    fn apply(&mut self, event: GridEvent) {
        match event {
            GridEvent::BoardsLoaded { workspace_id, boards } => self.apply_listing(workspace_id, boards),
            GridEvent::BoardMetadataUpdated { id, rating, labels } => {
                self.apply_metadata(id, rating, labels)
            }
            GridEvent::BoardDeleted { id } => {
                self.remove_card(&id);
            }
            GridEvent::Error { message } => {
                log::error!("[board_grid] engine error: {message}");
                self.last_error = Some(message);
            }
            GridEvent::Unknown => log::debug!("[board_grid] ignoring unknown event"),
        }
    }

    fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.ledger.expire(now);
        for op in &expired {
            if self.has_pending(&op.entity) {
                continue;
            }
            log::warn!("metadata edit for board {} was never confirmed", op.entity);
            if let Ok(card) = self.card_mut(&op.entity) {
                card.sync = SyncState::Unconfirmed;
            }
        }
        expired.len()
    }
}
