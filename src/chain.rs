//! The chain-replication protocol engine: role detection, the
//! pending-update table, and the forward/backward message protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::PEER_BASE;
use crate::error::Result;
use crate::net::connection::{NodeLogic, PeerConnection};
use crate::net::connector::Connector;
use crate::net::frame::{self, MessageType, Update};
use crate::net::PeerId;
use crate::store::Store;

/// An in-flight update this node has forwarded and is awaiting word of.
///
/// Only the head ever stores `Waiting`: it parks the suspended `put`
/// caller behind a one-shot completion (see spec.md §9's recommended
/// design, preferred over a condvar-guarded map since it needs no
/// predicate re-check and can't spuriously wake). A middle node stores
/// `Forwarded` purely for bookkeeping -- nothing reads it back before
/// the backward pass erases it, per spec.md §9's note that the table is
/// "effectively write-only at middles".
enum PendingEntry {
    Waiting(oneshot::Sender<()>),
    Forwarded,
}

/// The chain-replication logic for one node.
pub struct ChainReplication {
    id: PeerId,
    store: Store,
    connector: Arc<Connector>,
    previous: Mutex<Option<Arc<PeerConnection>>>,
    next: Mutex<Option<Arc<PeerConnection>>>,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    next_installed: Mutex<bool>,
    next_txn_id: AtomicU64,
}

impl ChainReplication {
    /// Creates the logic for node `id`, bound to `hostname`'s
    /// `PEER_BASE + id` port. The connector holds only a weak reference
    /// back to this logic, breaking the `Arc` cycle described in
    /// spec.md §9.
    pub fn new(id: PeerId, hostname: String) -> Arc<Self> {
        assert!(u32::from(id) < 1000, "identifier should be a small integer");

        Arc::new_cyclic(|weak: &Weak<ChainReplication>| {
            let logic_handle: Weak<dyn NodeLogic> = weak.clone();
            let connector = Connector::new(id, hostname, PEER_BASE + id_as_u16(id), logic_handle);
            ChainReplication {
                id,
                store: Store::new(),
                connector,
                previous: Mutex::new(None),
                next: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_installed: Mutex::new(false),
                next_txn_id: AtomicU64::new(0),
            }
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_head(&self) -> bool {
        self.previous.lock().unwrap().is_none()
    }

    pub fn is_tail(&self) -> bool {
        self.next.lock().unwrap().is_none()
    }

    /// Starts the connector's listener, then, if a predecessor was
    /// configured, dials it and installs the returned handle as
    /// `previous`. The successor (if any) arrives later via an inbound
    /// connection, handled in `handle_incoming_connection`.
    pub async fn start(self: &Arc<Self>, predecessor: Option<PeerId>) -> Result<()> {
        self.connector.start().await?;

        if let Some(predecessor) = predecessor {
            info!(predecessor = %predecessor, "connecting to predecessor");
            let port = PEER_BASE + id_as_u16(predecessor);
            let conn = self.connector.connect_to_peer("localhost", port).await?;
            *self.previous.lock().unwrap() = Some(conn);
        }

        Ok(())
    }

    /// Store a new entry on every node in the replica set. Only legal
    /// at the head; calling this elsewhere is a protocol violation.
    pub async fn put(&self, key: String, value: String) {
        assert!(self.is_head(), "put is only legal at the head of the chain");

        if self.is_tail() {
            // Chain of length 1: no peers to coordinate with.
            info!("fast path: chain has length 1, applying locally");
            self.store.put(key, value);
            return;
        }

        // Head-applies-first: the write is visible locally before the
        // backward pass completes (spec.md §9 Open Question #1).
        self.store.put(key.clone(), value.clone());

        // A monotonic counter, not a hash of the key (spec.md §9's
        // alternative): the runtime here is a genuinely multi-threaded
        // tokio executor, so two concurrent `put`s for the same key can
        // both reach this point before either inserts into `pending`.
        // A hash-of-key id would let the second insert's oneshot
        // silently replace and drop the first caller's completion,
        // unblocking it before its own forward pass -- let alone the
        // backward pass -- has gone anywhere. A per-call counter keeps
        // every in-flight write in its own slot regardless of key.
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(txn_id, PendingEntry::Waiting(tx));
        }

        let update = Update { txn_id, key, value };
        if let Err(e) = self.forward(&update).await {
            warn!(txn_id, error = %e, "failed to forward update; pending entry is now orphaned");
            // No retry/timeout at this layer (spec.md §7): the caller
            // is left waiting on `rx`, same as a lost backward pass.
            return;
        }

        let _ = rx.await;
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn get_all(&self) -> Vec<(String, String)> {
        self.store.snapshot()
    }

    /// Exposed for tests: is `peer_id` currently in our peer registry?
    pub fn connector_has_peer(&self, peer_id: PeerId) -> bool {
        self.connector.has_peer(peer_id)
    }

    async fn forward(&self, update: &Update) -> Result<()> {
        let next = self
            .next
            .lock()
            .unwrap()
            .clone()
            .expect("forward is only called at a non-tail node");
        let payload = frame::serialize_update(update)?;
        next.send(MessageType::ForwardPass, &payload).await
    }

    async fn acknowledge(&self, update: &Update) -> Result<()> {
        let previous = self
            .previous
            .lock()
            .unwrap()
            .clone()
            .expect("acknowledge is only called at a non-head node");
        let payload = frame::serialize_update(update)?;
        previous.send(MessageType::BackwardPass, &payload).await
    }

    /// Removes `txn_id` from the pending table, if present, notifying a
    /// waiting `put` caller at the head. A missing `txn_id` is a no-op
    /// (spec.md §8 P3: idempotent against duplicate backward passes).
    fn clear_pending(&self, txn_id: u64) {
        let entry = self.pending.lock().unwrap().remove(&txn_id);
        if let Some(PendingEntry::Waiting(tx)) = entry {
            let _ = tx.send(());
        }
    }

    async fn on_forward_pass(&self, update: Update) {
        self.store.put(update.key.clone(), update.value.clone());

        if self.is_tail() {
            if let Err(e) = self.acknowledge(&update).await {
                warn!(txn_id = update.txn_id, error = %e, "failed to send backward pass");
            }
        } else {
            self.pending
                .lock()
                .unwrap()
                .insert(update.txn_id, PendingEntry::Forwarded);
            if let Err(e) = self.forward(&update).await {
                warn!(txn_id = update.txn_id, error = %e, "failed to forward update downstream");
            }
        }
    }

    async fn on_backward_pass(&self, update: Update) {
        self.clear_pending(update.txn_id);

        if !self.is_head() {
            if let Err(e) = self.acknowledge(&update).await {
                warn!(txn_id = update.txn_id, error = %e, "failed to propagate backward pass upstream");
            }
        }
    }
}

#[async_trait]
impl NodeLogic for ChainReplication {
    async fn handle_message(&self, _peer: PeerId, message_type: MessageType, payload: Vec<u8>) {
        let update = match frame::decode_update(&payload) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "dropping malformed update payload");
                return;
            }
        };

        match message_type {
            MessageType::ForwardPass => self.on_forward_pass(update).await,
            MessageType::BackwardPass => self.on_backward_pass(update).await,
        }
    }

    async fn handle_disconnect(&self, peer: PeerId) {
        info!(peer = %peer, "lost connection to peer");
    }

    async fn handle_incoming_connection(&self, peer: PeerId) {
        let conn = self
            .connector
            .peer(peer)
            .expect("connector must already know about the peer it just reported");

        let mut installed = self.next_installed.lock().unwrap();
        assert!(
            !*installed,
            "protocol violation: handle_incoming_connection fired twice"
        );
        *installed = true;

        info!(peer = %peer, "accepted successor connection");
        *self.next.lock().unwrap() = Some(conn);
    }
}

#[async_trait]
impl crate::http::Logic for ChainReplication {
    async fn get(&self, key: &str) -> Option<String> {
        self.get(key)
    }

    async fn put(&self, key: String, value: String) {
        self.put(key, value).await
    }

    async fn get_all(&self) -> Vec<(String, String)> {
        self.get_all()
    }
}

fn id_as_u16(id: PeerId) -> u16 {
    u32::from(id) as u16
}

/// Runs a chain-replicated node: starts the protocol engine and the
/// HTTP front end, and never returns.
pub async fn serve(index: u32, connect_to: Vec<u32>) -> Result<()> {
    assert!(connect_to.len() <= 1, "chain replication accepts at most one predecessor");

    let predecessor = connect_to.first().map(|&id| PeerId::from(id));
    let logic = ChainReplication::new(PeerId::from(index), "localhost".to_string());
    logic.start(predecessor).await?;

    info!(id = index, "started minikv node (chain replication)");
    crate::http::serve(logic, index).await
}
