//! Reconciliation stores: one authoritative client-side projection per
//! entity set, each owning its bridge.
//!
//! ```text
//!  user action ──► optimistic apply ──► ledger.register ──► bridge.send
//!                                                              │
//!  bridge tick ──► Subscription ──► pump() ──► apply(event) ◄───┘ echo
//!                                       ├─ seen id?        drop
//!                                       ├─ ledger match?   promote temp id in place
//!                                       └─ otherwise       apply as fresh, mark seen
//! ```
//!
//! Every `pump` first expires ledger entries older than the pending timeout,
//! so the ledger stays bounded as long as the store is being pumped.
//!
//! Stores are plain `&mut self` state for a single logical thread; only the
//! bridge's polling task runs elsewhere.

use std::time::Instant;

use cyan_core::protocol::Protocol;

use crate::bridge::{Bridge, BridgeState, Subscription};

pub mod chat;
pub mod direct;
pub mod grid;
pub mod message_log;
pub mod tree;

pub use chat::{ChatScope, ChatStore};
pub use direct::DirectMessageStore;
pub use grid::BoardGridStore;
pub use message_log::MessageLog;
pub use tree::{NodeKind, TreeStore};

/// Result of a user-facing mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Temporary id of the optimistically inserted entity, if one was created.
    pub temp_id: Option<String>,
    /// `false` only when the boundary rejected the command outright. The
    /// optimistic change stays applied either way.
    pub delivered: bool,
}

impl Outcome {
    pub(crate) fn created(temp_id: String, delivered: bool) -> Self {
        Self {
            temp_id: Some(temp_id),
            delivered,
        }
    }

    pub(crate) fn sent(delivered: bool) -> Self {
        Self {
            temp_id: None,
            delivered,
        }
    }

    /// A purely local change; nothing was sent.
    pub(crate) fn local() -> Self {
        Self::sent(true)
    }
}

/// Shared lifecycle and event plumbing for every store.
#[allow(async_fn_in_trait)]
pub trait Store {
    type Protocol: Protocol;

    fn bridge(&self) -> &Bridge<Self::Protocol>;
    fn bridge_mut(&mut self) -> &mut Bridge<Self::Protocol>;
    fn events(&mut self) -> &mut Subscription<<Self::Protocol as Protocol>::Event>;

    /// Reconcile one confirmed event into the projection.
    fn apply(&mut self, event: <Self::Protocol as Protocol>::Event);

    /// Drop ledger entries older than the timeout; their entities stay
    /// visible, marked unconfirmed. Returns how many expired.
    fn expire_pending(&mut self, now: Instant) -> usize;

    fn start(&mut self) {
        self.bridge_mut().start();
    }

    fn stop(&mut self) {
        self.bridge_mut().stop();
    }

    /// Stop polling and release the subscription's sender side.
    fn dispose(&mut self) {
        self.bridge_mut().dispose();
    }

    fn state(&self) -> BridgeState {
        self.bridge().state()
    }

    /// Expire stale ledger entries, then apply every event already
    /// delivered by the bridge.
    fn pump(&mut self) -> usize {
        self.expire_pending(Instant::now());
        let mut applied = 0;
        while let Some(event) = self.events().try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Drain the bridge on this thread, then pump.
    fn sync_now(&mut self) -> usize {
        self.bridge().drain();
        self.pump()
    }

    /// Wait for the next delivered event and apply it. `false` once the
    /// bridge has been disposed.
    async fn apply_next(&mut self) -> bool {
        match self.events().recv().await {
            Some(event) => {
                self.expire_pending(Instant::now());
                self.apply(event);
                true
            }
            None => false,
        }
    }
}
