use std::collections::HashSet;

use crate::error::{Result, SessionError};
use crate::message_log::MessageLog;
use crate::models::{DeliveryState, Message, MessageId, Millis};
use crate::protocol::ClientFrame;

pub const TIMEOUT_REASON: &str = "timeout";

/// Result of a successful local submit.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub id: MessageId,
    pub frame: ClientFrame,
    pub timeout_at: Millis,
}

/// Optimistic send tracking: `Pending -> Confirmed | Failed`.
#[derive(Debug)]
pub struct SendCoordinator {
    in_flight: HashSet<MessageId>,
    send_timeout: Millis,
}

impl SendCoordinator {
    pub fn new(send_timeout: Millis) -> Self {
        SendCoordinator {
            in_flight: HashSet::new(),
            send_timeout,
        }
    }

    pub fn submit(
        &mut self,
        log: &mut MessageLog,
        text: &str,
        sender_id: &str,
        now: Millis,
    ) -> Result<Submitted> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let message = Message::outgoing(sender_id.to_string(), text.to_string(), now);
        let id = message.id.clone();
        let frame = ClientFrame::Send {
            id: id.clone(),
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            sent_at: message.sent_at,
        };
        log.append(message);
        self.in_flight.insert(id.clone());
        log::debug!("submitted {} (pending)", id);

        Ok(Submitted {
            id,
            frame,
            timeout_at: now.saturating_add(self.send_timeout),
        })
    }

    pub fn on_acknowledged(
        &mut self,
        log: &mut MessageLog,
        id: &MessageId,
        server_sent_at: Option<Millis>,
    ) -> Result<()> {
        if !log.update_delivery_state(id, DeliveryState::Confirmed)? {
            return Ok(());
        }
        self.in_flight.remove(id);
        if let Some(sent_at) = server_sent_at {
            log.reposition(id, sent_at)?;
        }
        log::debug!("{} confirmed", id);
        Ok(())
    }

    pub fn on_rejected(&mut self, log: &mut MessageLog, id: &MessageId, reason: &str) -> Result<()> {
        if log.update_delivery_state(id, DeliveryState::failed(reason))? {
            self.in_flight.remove(id);
            log::debug!("{} failed: {}", id, reason);
        }
        Ok(())
    }

    /// Local timeout decision. Fires at most once per attempt; an attempt
    /// that was already resolved is left alone.
    pub fn on_timeout(&mut self, log: &mut MessageLog, id: &MessageId) -> Result<bool> {
        if !self.in_flight.contains(id) {
            return Ok(false);
        }
        self.on_rejected(log, id, TIMEOUT_REASON)?;
        Ok(true)
    }

    /// Fails every attempt still pending. Returns the affected ids.
    pub fn fail_all_pending(&mut self, log: &mut MessageLog, reason: &str) -> Vec<MessageId> {
        let mut failed = Vec::new();
        for id in log.pending_ids() {
            match log.update_delivery_state(&id, DeliveryState::failed(reason)) {
                Ok(_) => failed.push(id),
                Err(e) => log::warn!("could not fail {}: {}", id, e),
            }
        }
        self.in_flight.clear();
        failed
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
