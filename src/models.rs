use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Opaque message identifier, assigned by the originating client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery state of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    /// Terminal. A resend is a new message with a new id.
    Failed(String),
}

impl DeliveryState {
    pub fn failed(reason: impl Into<String>) -> Self {
        DeliveryState::Failed(reason.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryState::Pending)
    }

    /// Only a pending attempt may move, and only forward.
    pub fn can_transition_to(&self, next: &DeliveryState) -> bool {
        match (self, next) {
            (DeliveryState::Pending, DeliveryState::Confirmed) => true,
            (DeliveryState::Pending, DeliveryState::Failed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Pending => f.write_str("pending"),
            DeliveryState::Confirmed => f.write_str("confirmed"),
            DeliveryState::Failed(reason) => write!(f, "not delivered \u{2014} {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub text: String,
    pub sent_at: Millis,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// A locally composed message awaiting relay acknowledgment.
    pub fn outgoing(sender_id: String, text: String, sent_at: Millis) -> Self {
        Message {
            id: MessageId::generate(),
            sender_id,
            text,
            sent_at,
            delivery_state: DeliveryState::Pending,
        }
    }

    /// A message delivered by the relay. Remote messages are always confirmed.
    pub fn remote(id: MessageId, sender_id: String, text: String, sent_at: Millis) -> Self {
        Message {
            id,
            sender_id,
            text,
            sent_at,
            delivery_state: DeliveryState::Confirmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub participant_id: String,
    pub last_signal_at: Millis,
}
