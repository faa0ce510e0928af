//! Session controller: the single mutation gateway over the message log,
//! presence tracker and send coordinator.
//!
//! The controller is synchronous and performs no I/O. Each operation returns
//! the [`Effect`]s its driver must carry out (frames to send, timers to arm),
//! so the same state machine runs under the async actor in [`crate::handle`]
//! and directly in tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::message_log::{LogView, MessageLog};
use crate::models::{Message, MessageId, Millis};
use crate::presence::{typing_banner, PresenceTracker};
use crate::protocol::{ClientFrame, RelayFrame};
use crate::send::SendCoordinator;

pub const DISCONNECT_REASON: &str = "disconnected";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    TypingExpiry(String),
    SendTimeout(MessageId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(ClientFrame),
    /// (Re)arm the timer for `key` to fire at `at`.
    ArmTimer { key: TimerKey, at: Millis },
    CancelTimers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Terminal.
    Disconnected,
}

/// Consistent read state handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: LogView,
    pub typing: Vec<String>,
    pub state: SessionState,
}

impl SessionSnapshot {
    pub fn typing_banner(&self) -> Option<String> {
        typing_banner(&self.typing)
    }
}

pub struct Session {
    participant_id: String,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    log: MessageLog,
    presence: PresenceTracker,
    sends: SendCoordinator,
    last_typing_sent: Option<Millis>,
    /// Latest relay `at` per typist, used only to drop reordered frames.
    typing_seen: HashMap<String, Millis>,
    state: SessionState,
}

impl Session {
    pub fn new(participant_id: impl Into<String>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Session {
            participant_id: participant_id.into(),
            presence: PresenceTracker::new(config.typing_ttl_ms()),
            sends: SendCoordinator::new(config.send_timeout_ms()),
            config,
            clock,
            log: MessageLog::new(),
            last_typing_sent: None,
            typing_seen: HashMap::new(),
            state: SessionState::Active,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    pub fn handle_local_send(&mut self, text: &str) -> Result<(MessageId, Vec<Effect>)> {
        self.ensure_active()?;
        let now = self.clock.now();
        let submitted = self
            .sends
            .submit(&mut self.log, text, &self.participant_id, now)?;
        // the next keystroke starts a new burst
        self.last_typing_sent = None;

        let effects = vec![
            Effect::Send(submitted.frame),
            Effect::ArmTimer {
                key: TimerKey::SendTimeout(submitted.id.clone()),
                at: submitted.timeout_at,
            },
        ];
        Ok((submitted.id, effects))
    }

    /// Emits at most one outbound typing signal per debounce interval.
    pub fn handle_local_typing_keystroke(&mut self) -> Result<Vec<Effect>> {
        self.ensure_active()?;
        let now = self.clock.now();
        let due = match self.last_typing_sent {
            Some(last) => now.saturating_sub(last) >= self.config.typing_debounce_ms(),
            None => true,
        };
        if !due {
            return Ok(Vec::new());
        }
        self.last_typing_sent = Some(now);
        Ok(vec![Effect::Send(ClientFrame::Typing {
            sender_id: self.participant_id.clone(),
            at: now,
        })])
    }

    pub fn handle_relay_event(&mut self, event: RelayFrame) -> Result<Vec<Effect>> {
        self.ensure_active()?;
        match event {
            RelayFrame::Message {
                id,
                sender_id,
                text,
                sent_at,
            } => {
                if text.trim().is_empty() {
                    log::warn!("dropping blank message {} from {}", id, sender_id);
                    return Ok(Vec::new());
                }
                self.clear_typing(&sender_id);
                self.log.append(Message::remote(id, sender_id, text, sent_at));
                Ok(Vec::new())
            }
            RelayFrame::Ack { id, sent_at } => {
                self.sends.on_acknowledged(&mut self.log, &id, sent_at)?;
                Ok(Vec::new())
            }
            RelayFrame::Reject { id, reason } => {
                self.sends.on_rejected(&mut self.log, &id, &reason)?;
                Ok(Vec::new())
            }
            RelayFrame::Typing { sender_id, at } => {
                if sender_id == self.participant_id {
                    return Ok(Vec::new());
                }
                if let Some(seen) = self.typing_seen.get(&sender_id) {
                    if at < *seen {
                        log::debug!("dropping reordered typing frame from {}", sender_id);
                        return Ok(Vec::new());
                    }
                }
                self.typing_seen.insert(sender_id.clone(), at);
                // stamped on receipt: relay and local clocks may disagree
                let expires_at = self.presence.signal_typing(&sender_id, self.clock.now());
                Ok(vec![Effect::ArmTimer {
                    key: TimerKey::TypingExpiry(sender_id),
                    at: expires_at,
                }])
            }
            RelayFrame::Disconnect { reason } => {
                log::info!("relay closed session for {}: {}", self.participant_id, reason);
                Ok(self.handle_disconnect())
            }
        }
    }

    /// Timer wake-up. Ignored once the session is over.
    pub fn handle_timer(&mut self, key: &TimerKey) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        let now = self.clock.now();
        match key {
            TimerKey::TypingExpiry(participant_id) => {
                if self.presence.expire(participant_id, now) {
                    self.typing_seen.remove(participant_id);
                    log::debug!("{} stopped typing", participant_id);
                }
            }
            TimerKey::SendTimeout(id) => {
                if self.sends.on_timeout(&mut self.log, id)? {
                    log::warn!("send {} timed out", id);
                }
            }
        }
        Ok(())
    }

    /// Fails every pending send, clears presence and ends the session.
    /// Repeated calls are no-ops.
    pub fn handle_disconnect(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }
        let failed = self.sends.fail_all_pending(&mut self.log, DISCONNECT_REASON);
        self.presence.clear_all();
        self.typing_seen.clear();
        self.state = SessionState::Disconnected;
        log::info!(
            "session for {} disconnected, {} pending message(s) failed",
            self.participant_id,
            failed.len()
        );
        vec![Effect::CancelTimers]
    }

    pub fn messages(&self) -> LogView {
        self.log.view()
    }

    pub fn currently_typing(&self) -> Vec<String> {
        self.presence.currently_typing(self.clock.now())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages(),
            typing: self.currently_typing(),
            state: self.state,
        }
    }

    fn clear_typing(&mut self, participant_id: &str) {
        self.presence.clear(participant_id);
        self.typing_seen.remove(participant_id);
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Disconnected => Err(SessionError::InvalidState),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::DeliveryState;

    fn session() -> (Session, ManualClock) {
        let clock = ManualClock::new(1_000);
        let session = Session::new("me", SessionConfig::default(), Arc::new(clock.clone()));
        (session, clock)
    }

    fn delivery(session: &Session, id: &MessageId) -> DeliveryState {
        session.messages().get(id).unwrap().delivery_state.clone()
    }

    #[test]
    fn test_local_send_emits_frame_and_timeout() {
        let (mut session, _clock) = session();
        let (id, effects) = session.handle_local_send("hi").unwrap();

        assert_eq!(effects.len(), 2);
        assert!(matches!(&effects[0], Effect::Send(ClientFrame::Send { id: sent, .. }) if *sent == id));
        assert_eq!(
            effects[1],
            Effect::ArmTimer {
                key: TimerKey::SendTimeout(id.clone()),
                at: 11_000
            }
        );
        assert_eq!(delivery(&session, &id), DeliveryState::Pending);
    }

    #[test]
    fn test_empty_send_leaves_log_unchanged() {
        let (mut session, _clock) = session();
        assert!(matches!(
            session.handle_local_send(" \t ").unwrap_err(),
            SessionError::EmptyMessage
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_ack_and_reject_dispatch() {
        let (mut session, _clock) = session();
        let (a, _) = session.handle_local_send("one").unwrap();
        let (b, _) = session.handle_local_send("two").unwrap();

        session
            .handle_relay_event(RelayFrame::Ack { id: a.clone(), sent_at: Some(1_005) })
            .unwrap();
        session
            .handle_relay_event(RelayFrame::Reject { id: b.clone(), reason: "too long".into() })
            .unwrap();

        assert_eq!(delivery(&session, &a), DeliveryState::Confirmed);
        assert_eq!(delivery(&session, &b), DeliveryState::failed("too long"));

        let err = session
            .handle_relay_event(RelayFrame::Reject { id: a.clone(), reason: "late".into() })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_remote_messages_sorted_and_deduplicated() {
        let (mut session, _clock) = session();
        for (id, at) in [("m2", 200), ("m1", 100), ("m2", 200)] {
            session
                .handle_relay_event(RelayFrame::Message {
                    id: id.into(),
                    sender_id: "bob".into(),
                    text: "x".into(),
                    sent_at: at,
                })
                .unwrap();
        }
        let view = session.messages();
        let ids: Vec<&str> = view.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_typing_arms_expiry_and_message_clears_it() {
        let (mut session, clock) = session();
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 1_000 })
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::ArmTimer {
                key: TimerKey::TypingExpiry("bob".into()),
                at: 4_000
            }]
        );
        assert_eq!(session.currently_typing(), vec!["bob"]);

        session
            .handle_relay_event(RelayFrame::Message {
                id: "m1".into(),
                sender_id: "bob".into(),
                text: "done".into(),
                sent_at: 1_500,
            })
            .unwrap();
        assert!(session.currently_typing().is_empty());

        clock.set(2_000);
        session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 2_000 })
            .unwrap();
        clock.set(4_999);
        session.handle_timer(&TimerKey::TypingExpiry("bob".into())).unwrap();
        assert_eq!(session.currently_typing(), vec!["bob"]);
        clock.set(5_000);
        session.handle_timer(&TimerKey::TypingExpiry("bob".into())).unwrap();
        assert!(session.snapshot().typing.is_empty());
    }

    #[test]
    fn test_typing_uses_local_receive_time() {
        let (mut session, clock) = session();
        clock.set(10_000);
        // relay clock runs 3.5s behind ours
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 6_500 })
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::ArmTimer {
                key: TimerKey::TypingExpiry("bob".into()),
                at: 13_000
            }]
        );
        assert_eq!(session.currently_typing(), vec!["bob"]);

        clock.set(12_999);
        session.handle_timer(&TimerKey::TypingExpiry("bob".into())).unwrap();
        assert_eq!(session.currently_typing(), vec!["bob"]);
        clock.set(13_000);
        session.handle_timer(&TimerKey::TypingExpiry("bob".into())).unwrap();
        assert!(session.currently_typing().is_empty());
    }

    #[test]
    fn test_reordered_typing_frame_dropped() {
        let (mut session, clock) = session();
        session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 5_000 })
            .unwrap();
        clock.set(2_500);
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 4_000 })
            .unwrap();
        assert!(effects.is_empty());

        // the older frame did not refresh the entry
        clock.set(4_000);
        session.handle_timer(&TimerKey::TypingExpiry("bob".into())).unwrap();
        assert!(session.currently_typing().is_empty());

        // once the entry is gone any timestamp is accepted again
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 1 })
            .unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(session.currently_typing(), vec!["bob"]);
    }

    #[test]
    fn test_far_future_typing_at_does_not_panic() {
        let (mut session, _clock) = session();
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: i64::MAX })
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::ArmTimer {
                key: TimerKey::TypingExpiry("bob".into()),
                at: 4_000
            }]
        );
        assert_eq!(session.currently_typing(), vec!["bob"]);
    }

    #[test]
    fn test_blank_inbound_message_dropped() {
        let (mut session, _clock) = session();
        session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 1_000 })
            .unwrap();
        let effects = session
            .handle_relay_event(RelayFrame::Message {
                id: "m1".into(),
                sender_id: "bob".into(),
                text: " \n\t".into(),
                sent_at: 1_000,
            })
            .unwrap();
        assert!(effects.is_empty());
        assert!(session.messages().is_empty());
        assert_eq!(session.currently_typing(), vec!["bob"]);
    }

    #[test]
    fn test_own_typing_echo_ignored() {
        let (mut session, _clock) = session();
        let effects = session
            .handle_relay_event(RelayFrame::Typing { sender_id: "me".into(), at: 1_000 })
            .unwrap();
        assert!(effects.is_empty());
        assert!(session.currently_typing().is_empty());
    }

    #[test]
    fn test_keystrokes_are_debounced() {
        let (mut session, clock) = session();
        assert_eq!(session.handle_local_typing_keystroke().unwrap().len(), 1);
        clock.advance(100);
        assert!(session.handle_local_typing_keystroke().unwrap().is_empty());
        clock.advance(399);
        assert!(session.handle_local_typing_keystroke().unwrap().is_empty());
        clock.advance(1);
        let effects = session.handle_local_typing_keystroke().unwrap();
        assert_eq!(
            effects,
            vec![Effect::Send(ClientFrame::Typing { sender_id: "me".into(), at: 1_500 })]
        );

        // sending ends the burst
        session.handle_local_send("hello").unwrap();
        clock.advance(10);
        assert_eq!(session.handle_local_typing_keystroke().unwrap().len(), 1);
    }

    #[test]
    fn test_send_timeout_via_timer() {
        let (mut session, clock) = session();
        let (id, _) = session.handle_local_send("hello?").unwrap();
        clock.advance(10_000);
        let key = TimerKey::SendTimeout(id.clone());
        session.handle_timer(&key).unwrap();
        session.handle_timer(&key).unwrap();
        assert_eq!(delivery(&session, &id), DeliveryState::failed("timeout"));
    }

    #[test]
    fn test_disconnect_sweep() {
        let (mut session, _clock) = session();
        let (a, _) = session.handle_local_send("one").unwrap();
        let (b, _) = session.handle_local_send("two").unwrap();
        session
            .handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 1_000 })
            .unwrap();

        assert_eq!(session.handle_disconnect(), vec![Effect::CancelTimers]);
        assert_eq!(delivery(&session, &a), DeliveryState::failed("disconnected"));
        assert_eq!(delivery(&session, &b), DeliveryState::failed("disconnected"));
        assert!(session.currently_typing().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);

        assert!(session.handle_disconnect().is_empty());
    }

    #[test]
    fn test_actions_after_disconnect_are_invalid_state() {
        let (mut session, _clock) = session();
        session
            .handle_relay_event(RelayFrame::Disconnect { reason: "server shutdown".into() })
            .unwrap();

        assert!(matches!(session.handle_local_send("hi"), Err(SessionError::InvalidState)));
        assert!(matches!(
            session.handle_local_typing_keystroke(),
            Err(SessionError::InvalidState)
        ));
        assert!(matches!(
            session.handle_relay_event(RelayFrame::Typing { sender_id: "bob".into(), at: 1 }),
            Err(SessionError::InvalidState)
        ));
        assert!(session.messages().is_empty());
        assert!(session.currently_typing().is_empty());
    }
}
