//! Client side of the relay connection: newline-delimited JSON over TCP,
//! bridged to a session task.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::SystemClock;
use crate::config::SessionConfig;
use crate::handle::{spawn_session, SessionHandle};
use crate::protocol::{decode_frame, encode_frame, ClientFrame, RelayFrame};
use crate::session::Session;

pub struct Connection {
    pub session: SessionHandle,
    reader: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
}

impl Connection {
    /// Waits for both halves of the connection to finish.
    pub async fn closed(self) -> Result<()> {
        let _ = self.reader.await;
        self.writer.await?
    }
}

pub async fn connect(addr: &str, participant_id: &str, config: SessionConfig) -> Result<Connection> {
    let stream = TcpStream::connect(addr).await?;
    log::info!("connected to relay at {} as {}", addr, participant_id);

    let (reader, mut socket_write) = tokio::io::split(stream);
    write_frame(
        &mut socket_write,
        &ClientFrame::Join {
            participant_id: participant_id.to_string(),
        },
    )
    .await?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let session = Session::new(participant_id, config, Arc::new(SystemClock::new()));
    let (handle, _task) = spawn_session(session, outbound_tx);

    let writer = tokio::spawn(pump_outbound(socket_write, outbound_rx, handle.clone()));

    let inbound = handle.clone();
    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    log::info!("relay closed the connection");
                    break;
                }
                Ok(_) => match decode_frame::<RelayFrame>(&line) {
                    Ok(frame) => {
                        log::debug!("received {:?}", frame);
                        if inbound.relay_event(frame).is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("ignoring malformed frame {:?}: {}", line.trim(), e),
                },
                Err(e) => {
                    log::error!("error reading from relay: {}", e);
                    break;
                }
            }
        }
        let _ = inbound.disconnect();
    });

    Ok(Connection {
        session: handle,
        reader,
        writer,
    })
}

/// Writes session frames to the relay until the session closes its queue.
/// A failed write takes the session down with it.
async fn pump_outbound<W>(
    mut socket_write: W,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    session: SessionHandle,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut socket_write, &frame).await {
            log::error!("error writing to relay: {}", e);
            let _ = session.disconnect();
            return Err(e);
        }
    }
    let _ = socket_write.shutdown().await;
    Ok(())
}

pub(crate) async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = encode_frame(frame)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
