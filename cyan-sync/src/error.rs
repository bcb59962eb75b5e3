//! Errors surfaced by user-facing store operations.
//!
//! Transport outcomes are not errors here: a rejected `send` is reported as
//! `delivered: false` on the returned [`Outcome`](crate::store::Outcome), and
//! logical failures arrive later as `Error` events.

use cyan_core::protocol::Subsystem;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("subsystem `{0}` already has an open channel")]
    SubsystemClaimed(Subsystem),

    #[error("parent `{0}` does not exist")]
    UnknownParent(String),

    #[error("parent `{0}` has not been confirmed by the engine yet")]
    UnconfirmedParent(String),

    #[error("`{0}` has not been confirmed by the engine yet")]
    Unconfirmed(String),

    #[error("no entity with id `{0}`")]
    UnknownEntity(String),

    #[error("workspace `{0}` is outside the active scope")]
    OutOfScope(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
