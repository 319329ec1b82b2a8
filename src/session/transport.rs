use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::fix::codec::split_frame;
use crate::session::engine::SessionEngine;
use crate::session::state::SessionState;
use crate::simulator::error::{SimulatorError, SimulatorResult};

/// Outgoing half of a connection as seen by a `SessionEngine`.
/// Implementations must not block: they are called with session state held.
pub trait Transport: Send + Sync {
    fn send_bytes(&self, frame: Bytes) -> SimulatorResult<()>;

    /// Stop accepting frames; already queued frames are still delivered.
    fn close(&self) {}
}

/// Frames queued for a writer task (or inspected directly in tests)
pub type OutboundFrames = mpsc::UnboundedReceiver<Bytes>;

/// Channel-backed transport; the receiving side is drained by
/// `spawn_tcp_session` or read directly by an in-memory peer.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, OutboundFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn send_bytes(&self, frame: Bytes) -> SimulatorResult<()> {
        let tx = self.tx.lock();
        let tx = tx
            .as_ref()
            .ok_or_else(|| SimulatorError::ConnectivityLost("transport closed".to_string()))?;
        tx.send(frame)
            .map_err(|_| SimulatorError::ConnectivityLost("outbound channel closed".to_string()))
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

const READ_CHUNK: usize = 4096;

/// Drive a session over a TCP stream: one task writes queued frames, one
/// reads, frames and feeds `SessionEngine::on_receive` in arrival order.
///
/// The reader ends on EOF, on a socket error, or once the session has
/// logged out. A connection that drops while the session is still up is
/// reported through `SessionEngine::on_transport_lost`.
pub fn spawn_tcp_session(
    stream: TcpStream,
    engine: Arc<SessionEngine>,
    mut outbound: OutboundFrames,
) -> JoinHandle<()> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (mut reader, mut writer) = stream.into_split();

    let writer_peer = peer.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                error!("Write of {} bytes to {} failed: {}", frame.len(), writer_peer, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tokio::spawn(async move {
        info!("Session {} attached to {}", engine.session_id(), peer);
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        let lost = loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => break Some("peer closed the connection".to_string()),
                Ok(n) => debug!("Read {} bytes from {}", n, peer),
                Err(e) => break Some(e.to_string()),
            }

            loop {
                match split_frame(&mut buf) {
                    Ok(Some(frame)) => engine.on_receive(&frame),
                    Ok(None) => break,
                    Err(e) => engine.report(e),
                }
            }

            if engine.state() == SessionState::Disconnected && engine.has_logged_out() {
                break None;
            }
        };

        match lost {
            Some(reason) => engine.on_transport_lost(&reason),
            None => info!("Session {} closed cleanly", engine.session_id()),
        }

        // Flush whatever is queued (e.g. a Logout acknowledgment), then stop
        engine.close_transport();
        let _ = writer_task.await;
    })
}
