//! TCP listener + dialer, identity handshake, and peer registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::error::{Error, ErrorKind, Result, ResultWrappedExt};
use crate::net::connection::{NodeLogic, PeerConnection};
use crate::net::PeerId;

/// Length prefix for the identity handshake line: `u32` LE byte count,
/// followed by ASCII `"<id>:<host>:<port>"`.
const IDENTITY_HEADER_LEN: usize = 4;

/// Owns the TCP listener for this node and the registry of established
/// peer connections, keyed by peer id.
pub struct Connector {
    id: PeerId,
    hostname: String,
    port: u16,
    peers: Mutex<HashMap<PeerId, Arc<PeerConnection>>>,
    logic: Weak<dyn NodeLogic>,
}

impl Connector {
    pub fn new(id: PeerId, hostname: String, port: u16, logic: Weak<dyn NodeLogic>) -> Arc<Self> {
        Arc::new(Self {
            id,
            hostname,
            port,
            peers: Mutex::new(HashMap::new()),
            logic,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Binds the listener and spawns the accept loop. Should be called
    /// once per process.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let addr = (self.hostname.as_str(), self.port);
        let listener = TcpListener::bind(addr)
            .await
            .wrapped(ErrorKind::Communication)?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.accept_loop(listener).await;
        });

        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_incoming(stream).await {
                    warn!(%addr, error = %e, "inbound handshake failed");
                }
            });
        }
    }

    async fn handle_incoming(self: &Arc<Self>, mut stream: TcpStream) -> Result<()> {
        info!("got new incoming connection");

        send_identity(&mut stream, self.id, &self.hostname, self.port).await?;
        let (peer_id, hostname, port, leftover) = receive_identity(&mut stream).await?;

        if peer_id == self.id {
            panic!("protocol violation: self-connect on the accept path");
        }

        let mut peers = self.peers.lock().unwrap();
        if peers.contains_key(&peer_id) {
            warn!(peer = %peer_id, "node is already connected to us; dropping new socket");
            drop(peers);
            let _ = stream.shutdown().await;
            return Ok(());
        }

        let (read_half, write_half) = stream.into_split();
        let conn = PeerConnection::new(
            peer_id,
            hostname,
            port,
            read_half,
            write_half,
            leftover,
            Weak::clone(&self.logic),
        );
        peers.insert(peer_id, Arc::clone(&conn));
        drop(peers);

        if let Some(logic) = self.logic.upgrade() {
            logic.handle_incoming_connection(peer_id).await;
        }

        Ok(())
    }

    /// Dials a peer at `(hostname, port)`. Returns the existing handle
    /// if we're already connected (per spec.md's duplicate-id policy on
    /// the dial path). Does not notify the logic -- the caller installs
    /// the returned handle as `previous`/`next` itself.
    pub async fn connect_to_peer(
        self: &Arc<Self>,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<PeerConnection>> {
        if hostname == self.hostname && port == self.port {
            panic!("protocol violation: attempted to connect to ourselves");
        }

        let mut stream = TcpStream::connect((hostname, port))
            .await
            .wrapped(ErrorKind::Communication)?;

        send_identity(&mut stream, self.id, &self.hostname, self.port).await?;
        let (peer_id, peer_host, peer_port, leftover) = receive_identity(&mut stream).await?;

        if peer_id == self.id {
            panic!("protocol violation: self-connect on the dial path");
        }

        let mut peers = self.peers.lock().unwrap();
        if let Some(existing) = peers.get(&peer_id) {
            return Ok(Arc::clone(existing));
        }

        let (read_half, write_half) = stream.into_split();
        let conn = PeerConnection::new(
            peer_id,
            peer_host,
            peer_port,
            read_half,
            write_half,
            leftover,
            Weak::clone(&self.logic),
        );
        peers.insert(peer_id, Arc::clone(&conn));

        Ok(conn)
    }

    pub fn has_peer(&self, peer_id: PeerId) -> bool {
        self.peers.lock().unwrap().contains_key(&peer_id)
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<Arc<PeerConnection>> {
        self.peers.lock().unwrap().get(&peer_id).cloned()
    }
}

async fn send_identity(stream: &mut TcpStream, id: PeerId, hostname: &str, port: u16) -> Result<()> {
    let msg = format!("{}:{}:{}", u32::from(id), hostname, port);
    let mut buf = Vec::with_capacity(IDENTITY_HEADER_LEN + msg.len());
    buf.extend_from_slice(&(msg.len() as u32).to_le_bytes());
    buf.extend_from_slice(msg.as_bytes());
    stream
        .write_all(&buf)
        .await
        .wrapped(ErrorKind::Communication)?;
    stream.flush().await.wrapped(ErrorKind::Communication)
}

/// Reads the peer's identity line, tolerating stream excess: any bytes
/// read past the identity terminator are returned so they can seed the
/// new connection's frame decoder.
async fn receive_identity(stream: &mut TcpStream) -> Result<(PeerId, String, u16, Vec<u8>)> {
    let mut in_data = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if in_data.len() >= IDENTITY_HEADER_LEN {
            let msg_len =
                u32::from_le_bytes(in_data[0..IDENTITY_HEADER_LEN].try_into().unwrap()) as usize;
            let total_len = IDENTITY_HEADER_LEN + msg_len;

            if in_data.len() >= total_len {
                let line = std::str::from_utf8(&in_data[IDENTITY_HEADER_LEN..total_len])
                    .wrapped(ErrorKind::Communication)?;
                let mut parts = line.splitn(3, ':');
                let id: u32 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::simple(ErrorKind::Communication))?;
                let host = parts
                    .next()
                    .ok_or_else(|| Error::simple(ErrorKind::Communication))?
                    .to_string();
                let port: u16 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::simple(ErrorKind::Communication))?;

                let leftover = in_data[total_len..].to_vec();
                return Ok((PeerId::from(id), host, port, leftover));
            }
        }

        let n = stream
            .read(&mut chunk)
            .await
            .wrapped(ErrorKind::Communication)?;
        if n == 0 {
            error!("peer closed connection during handshake");
            return Err(Error::simple(ErrorKind::Communication));
        }
        in_data.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_round_trips_identity_and_excess_bytes() {
        // Build a loopback pair and run both halves of the handshake
        // directly against `send_identity`/`receive_identity`, with a
        // second write appended to exercise stream-excess buffering.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            send_identity(&mut stream, PeerId::from(7), "127.0.0.1", 9999)
                .await
                .unwrap();
            // Coalesce a frame right after the identity line.
            stream.write_all(b"excess-bytes").await.unwrap();
            stream.flush().await.unwrap();
            // Keep the stream open long enough for the client to read.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (peer_id, host, port, leftover) = receive_identity(&mut client).await.unwrap();

        assert_eq!(peer_id, PeerId::from(7));
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 9999);
        assert_eq!(leftover, b"excess-bytes");

        server.await.unwrap();
    }
}
