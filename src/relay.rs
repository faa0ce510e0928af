//! Relay server: fans out messages and typing signals between connected
//! sessions, acknowledging or rejecting each send.

use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::client::write_frame;
use crate::protocol::{decode_frame, ClientFrame, RelayFrame};

type ConnId = u64;

struct Peer {
    participant_id: Option<String>,
    tx: mpsc::UnboundedSender<RelayFrame>,
}

type Peers = Arc<Mutex<HashMap<ConnId, Peer>>>;

pub struct Relay {
    peers: Peers,
    next_conn: AtomicU64,
}

impl Relay {
    pub fn new() -> Self {
        Relay {
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_conn: AtomicU64::new(1),
        }
    }

    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
            log::info!("new connection #{} from {}", conn_id, addr);

            let peers = Arc::clone(&self.peers);
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, addr, conn_id, peers).await {
                    log::error!("error handling connection #{}: {}", conn_id, e);
                }
            });
        }
    }

    pub async fn connected(&self) -> usize {
        self.peers
            .lock()
            .await
            .values()
            .filter(|p| p.participant_id.is_some())
            .count()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_client(socket: TcpStream, addr: SocketAddr, conn_id: ConnId, peers: Peers) -> Result<()> {
    let (reader, mut socket_write) = tokio::io::split(socket);
    let mut reader = BufReader::new(reader);
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayFrame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            log::debug!("sending to #{}: {:?}", conn_id, frame);
            if let Err(e) = write_frame(&mut socket_write, &frame).await {
                log::error!("error writing to connection #{}: {}", conn_id, e);
                break;
            }
        }
    });

    peers.lock().await.insert(
        conn_id,
        Peer {
            participant_id: None,
            tx: tx.clone(),
        },
    );

    let mut participant: Option<String> = None;
    let mut line = String::new();
    let result: Result<()> = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }

        let frame = match decode_frame::<ClientFrame>(&line) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("invalid frame from {}: {}", addr, e);
                continue;
            }
        };

        match frame {
            ClientFrame::Join { participant_id } => {
                log::info!("#{} joined as {}", conn_id, participant_id);
                if let Some(peer) = peers.lock().await.get_mut(&conn_id) {
                    peer.participant_id = Some(participant_id.clone());
                }
                participant = Some(participant_id);
            }
            ClientFrame::Send {
                id,
                sender_id,
                text,
                sent_at: _,
            } => {
                let reason = match &participant {
                    None => Some("not joined"),
                    Some(joined) if *joined != sender_id => Some("invalid sender"),
                    Some(_) if text.trim().is_empty() => Some("empty message"),
                    Some(_) => None,
                };
                if let Some(reason) = reason {
                    let _ = tx.send(RelayFrame::Reject {
                        id,
                        reason: reason.to_string(),
                    });
                    continue;
                }

                let sent_at = chrono::Utc::now().timestamp_millis();
                let _ = tx.send(RelayFrame::Ack {
                    id: id.clone(),
                    sent_at: Some(sent_at),
                });
                broadcast(
                    &peers,
                    conn_id,
                    RelayFrame::Message {
                        id,
                        sender_id,
                        text,
                        sent_at,
                    },
                )
                .await;
            }
            ClientFrame::Typing { .. } => {
                let Some(sender_id) = participant.clone() else {
                    continue;
                };
                let at = chrono::Utc::now().timestamp_millis();
                broadcast(&peers, conn_id, RelayFrame::Typing { sender_id, at }).await;
            }
        }
    };

    peers.lock().await.remove(&conn_id);
    log::info!("connection #{} ({:?}) closed", conn_id, participant);
    result
}

/// Delivers `frame` to every joined connection except `origin`.
async fn broadcast(peers: &Peers, origin: ConnId, frame: RelayFrame) {
    let peers = peers.lock().await;
    for (conn_id, peer) in peers.iter() {
        if *conn_id == origin || peer.participant_id.is_none() {
            continue;
        }
        if peer.tx.send(frame.clone()).is_err() {
            log::debug!("connection #{} is closing, frame dropped", conn_id);
        }
    }
}
