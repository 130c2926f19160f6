//! One duplex link to one peer: send lock, receive loop, and dispatch
//! into the owning protocol logic.

use std::sync::Weak;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, ResultWrappedExt};
use crate::net::frame::{self, FrameDecoder, MessageType};
use crate::net::PeerId;

/// Callbacks invoked by a `PeerConnection`'s receive loop.
///
/// Implemented by the chain-replication logic (and trivially ignorable
/// by the non-replicated backend, which never constructs a connection).
#[async_trait]
pub trait NodeLogic: Send + Sync {
    /// Dispatch a decoded message from `peer`.
    async fn handle_message(&self, peer: PeerId, message_type: MessageType, payload: Vec<u8>);

    /// `peer` has disconnected (EOF or fatal decode error).
    async fn handle_disconnect(&self, peer: PeerId);

    /// A new inbound connection from `peer` has completed its handshake.
    async fn handle_incoming_connection(&self, peer: PeerId);
}

const RECV_CHUNK: usize = 4096;

/// A single bidirectional link to one peer, established after the
/// identity handshake has already been exchanged.
pub struct PeerConnection {
    id: PeerId,
    hostname: String,
    port: u16,
    write_half: AsyncMutex<OwnedWriteHalf>,
    receive_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Wraps an established socket (already split) as a peer connection,
    /// spawning its receive loop. `initial_buffer` carries over any
    /// bytes read past the identity line during the handshake.
    pub fn new(
        id: PeerId,
        hostname: String,
        port: u16,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        initial_buffer: Vec<u8>,
        logic: Weak<dyn NodeLogic>,
    ) -> std::sync::Arc<Self> {
        let conn = std::sync::Arc::new(Self {
            id,
            hostname,
            port,
            write_half: AsyncMutex::new(write_half),
            receive_task: AsyncMutex::new(None),
        });

        let task = tokio::spawn(Self::receive_loop(
            id,
            read_half,
            initial_buffer,
            logic,
        ));
        // `try_lock` never contends here: nothing else can reach this
        // mutex before the constructor returns.
        *conn.receive_task.try_lock().unwrap() = Some(task);

        conn
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends one framed message. Concurrent callers are serialized by
    /// the send lock, so wire integrity holds regardless of caller
    /// concurrency.
    pub async fn send(&self, message_type: MessageType, payload: &[u8]) -> Result<()> {
        let frame = frame::encode(message_type, payload);
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&frame).await.wrapped(crate::error::ErrorKind::Communication)?;
        write_half.flush().await.wrapped(crate::error::ErrorKind::Communication)
    }

    /// Closes the write half and cancels the receive task.
    pub async fn disconnect(&self) {
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
        drop(write_half);

        if let Some(task) = self.receive_task.lock().await.take() {
            task.abort();
        }
    }

    async fn receive_loop(
        id: PeerId,
        mut read_half: OwnedReadHalf,
        initial_buffer: Vec<u8>,
        logic: Weak<dyn NodeLogic>,
    ) {
        let mut decoder = FrameDecoder::with_initial_buffer(initial_buffer);
        let mut buf = [0u8; RECV_CHUNK];

        loop {
            // Drain every complete frame already buffered before
            // reading more off the wire.
            loop {
                match decoder.try_decode() {
                    Ok(Some((message_type, payload))) => {
                        let Some(logic) = logic.upgrade() else { return };
                        logic.handle_message(id, message_type, payload).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(peer = %id, error = %e, "tearing down connection: framing error");
                        if let Some(logic) = logic.upgrade() {
                            logic.handle_disconnect(id).await;
                        }
                        return;
                    }
                }
            }

            let n = match read_half.read(&mut buf).await {
                Ok(0) => {
                    debug!(peer = %id, "connection closed by peer");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(peer = %id, error = %e, "read error, closing connection");
                    break;
                }
            };
            decoder.push(&buf[..n]);
        }

        if let Some(logic) = logic.upgrade() {
            logic.handle_disconnect(id).await;
        }
    }
}
