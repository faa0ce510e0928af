//! Async owner of a [`Session`].
//!
//! Every local action, relay frame and timer wake-up is queued on one task,
//! so mutations never interleave. Readers get whole snapshots over a `watch`
//! channel.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, SessionError};
use crate::models::MessageId;
use crate::protocol::{ClientFrame, RelayFrame};
use crate::session::{Effect, Session, SessionSnapshot, SessionState};
use crate::timer::{TimerFired, TimerService};

enum Command {
    LocalSend {
        text: String,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    Keystroke {
        reply: oneshot::Sender<Result<()>>,
    },
    Relay(RelayFrame),
    Disconnect,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

/// Moves `session` onto its own task. Outbound frames are written to
/// `outbound` until the session disconnects.
pub fn spawn_session(
    session: Session,
    outbound: mpsc::UnboundedSender<ClientFrame>,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshots) = watch::channel(session.snapshot());
    let task = tokio::spawn(run(session, rx, Some(outbound), snapshot_tx));
    (SessionHandle { commands, snapshots }, task)
}

impl SessionHandle {
    /// Composer submit. Returns the id of the new attempt.
    pub async fn send(&self, text: impl Into<String>) -> Result<MessageId> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::LocalSend {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn typing_keystroke(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Keystroke { reply })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Queues an inbound frame. Protocol errors are logged by the session task.
    pub fn relay_event(&self, frame: RelayFrame) -> Result<()> {
        self.request(Command::Relay(frame))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    fn request(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

async fn run(
    mut session: Session,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    snapshots: watch::Sender<SessionSnapshot>,
) {
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<TimerFired>();
    let mut timers = TimerService::new();

    loop {
        let effects = tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    // every handle is gone; nobody can resolve what is pending
                    session.handle_disconnect();
                    timers.cancel_all();
                    snapshots.send_replace(session.snapshot());
                    break;
                };
                match command {
                    Command::LocalSend { text, reply } => {
                        let (result, effects) = match session.handle_local_send(&text) {
                            Ok((id, effects)) => (Ok(id), effects),
                            Err(e) => (Err(e), Vec::new()),
                        };
                        let _ = reply.send(result);
                        effects
                    }
                    Command::Keystroke { reply } => {
                        let (result, effects) = match session.handle_local_typing_keystroke() {
                            Ok(effects) => (Ok(()), effects),
                            Err(e) => (Err(e), Vec::new()),
                        };
                        let _ = reply.send(result);
                        effects
                    }
                    Command::Relay(frame) => match session.handle_relay_event(frame) {
                        Ok(effects) => effects,
                        Err(SessionError::InvalidState) => {
                            log::debug!("dropping relay frame for closed session");
                            Vec::new()
                        }
                        Err(e) => {
                            log::warn!("relay frame rejected: {}", e);
                            Vec::new()
                        }
                    },
                    Command::Disconnect => session.handle_disconnect(),
                }
            }
            Some(fired) = timer_rx.recv() => {
                if timers.fired(&fired) {
                    if let Err(e) = session.handle_timer(&fired.key) {
                        log::warn!("timer {:?} failed: {}", fired.key, e);
                    }
                }
                Vec::new()
            }
        };

        for effect in effects {
            match effect {
                Effect::Send(frame) => {
                    let queued = match &outbound {
                        Some(tx) => tx.send(frame).is_ok(),
                        None => false,
                    };
                    if !queued {
                        log::warn!("outbound relay queue closed, frame dropped");
                    }
                }
                Effect::ArmTimer { key, at } => {
                    let delay = at.saturating_sub(session.now()).max(0) as u64;
                    timers.arm(key, Duration::from_millis(delay), timer_tx.clone());
                }
                Effect::CancelTimers => timers.cancel_all(),
            }
        }

        if session.state() == SessionState::Disconnected {
            // lets the connection writer finish
            outbound = None;
        }
        snapshots.send_replace(session.snapshot());
    }
    log::debug!("session task for {} stopped", session.participant_id());
}
