//! # cyan-sync — client-side sync layer for the Cyan engine
//!
//! Turns the engine's poll-only, per-subsystem queues into reconciled,
//! optimistic client state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  send(json) / poll()  ┌──────────────┐
//! │   Channel    │ ◄───────────────────► │    Engine    │
//! │ (1 subsystem)│      Boundary         │ (opaque FFI) │
//! └──────┬───────┘                       └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐  tick: drain until empty
//! │  Bridge<P>   │ ──────────────► Subscription (fan-out)
//! └──────┬───────┘
//!        │ events
//!        ▼
//! ┌──────────────┐     ┌────────────────────────────┐
//! │    Store     │ ◄──►│ PendingLedger + SeenIds    │
//! │ tree / chat  │     │ (temp id ↔ confirmed id)   │
//! │ grid / DMs   │     └────────────────────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channel`] — exclusive per-subsystem channels over a shared boundary
//! - [`bridge`] — interval polling, decode, fan-out
//! - [`ledger`] — fingerprints, temp ids, pending operations, seen ids
//! - [`store`] — tree, chat, direct-message and board-grid projections
//! - [`session`] — one store per subsystem, startup sequence
//! - [`engine`] — in-memory boundary for tests and demos

pub mod bridge;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod session;
pub mod store;

pub use bridge::{Bridge, BridgeState, BridgeStats, Subscription};
pub use channel::{Channel, EngineLink};
pub use config::{BridgeConfig, SyncConfig};
pub use engine::MemoryEngine;
pub use error::SyncError;
pub use ledger::{Fingerprint, PendingLedger, PendingOperation, SeenIds, TempIds};
pub use session::Session;
pub use store::{
    BoardGridStore, ChatScope, ChatStore, DirectMessageStore, MessageLog, NodeKind, Outcome,
    Store, TreeStore,
};
