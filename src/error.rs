use thiserror::Error;

use crate::models::{DeliveryState, MessageId};

/// Errors returned by the session state model.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The composed text is blank after trimming.
    #[error("message text is empty")]
    EmptyMessage,

    /// No message with this id is in the log.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The requested delivery state change is not allowed.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: DeliveryState,
        to: DeliveryState,
    },

    /// The session has been disconnected.
    #[error("not connected")]
    InvalidState,

    /// The session task has stopped.
    #[error("session task closed")]
    Closed,

    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
