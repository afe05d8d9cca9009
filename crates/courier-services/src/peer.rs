//! Registry entries for connected peers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

/// Process-unique id of one live connection. A reconnect gets a new id even
/// when the identity is the same.
pub type PeerId = u64;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// A bounded outbound delivery queue could not take a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PeerUnreachable {
    #[error("outbound queue full")]
    Full,
    #[error("outbound queue closed")]
    Closed,
}

/// One connected, authenticated participant.
///
/// The entry holds the only sender for the peer's outbound queue. Dropping
/// the entry closes the queue and wakes [`OutboundQueue::removed`], which
/// ends the peer's outbound loop even in the middle of a stalled write.
#[derive(Debug)]
pub struct PeerEntry {
    pub id: PeerId,
    /// Identity resolved by the auth store at upgrade time.
    pub identity: String,
    pub connected_at: Instant,
    queue: mpsc::Sender<Bytes>,
    _registered: watch::Sender<()>,
}

impl PeerEntry {
    /// Create an entry and the receiving half of its outbound queue.
    pub fn new(identity: impl Into<String>, capacity: usize) -> (Self, OutboundQueue) {
        let (queue, frames) = mpsc::channel(capacity.max(1));
        let (registered, removed) = watch::channel(());
        let entry = Self {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            identity: identity.into(),
            connected_at: Instant::now(),
            queue,
            _registered: registered,
        };
        (entry, OutboundQueue { frames, removed })
    }

    /// Enqueue without waiting.
    pub fn offer(&self, frame: Bytes) -> Result<(), PeerUnreachable> {
        self.queue.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerUnreachable::Full,
            mpsc::error::TrySendError::Closed(_) => PeerUnreachable::Closed,
        })
    }
}

/// Receiving side of a peer's outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: mpsc::Receiver<Bytes>,
    removed: watch::Receiver<()>,
}

impl OutboundQueue {
    /// Next frame in enqueue order. Frames queued before the entry was
    /// dropped are still returned, then `None`.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.frames.try_recv()
    }

    /// Refuse further frames.
    pub fn close(&mut self) {
        self.frames.close();
    }

    /// Resolves once the registry entry has been dropped.
    pub async fn removed(&mut self) {
        while self.removed.changed().await.is_ok() {}
    }
}

/// The peer registry. Written only by the hub loop; observers read it.
pub type PeerRegistry = Arc<DashMap<PeerId, PeerEntry>>;

/// Create a new empty peer registry.
pub fn new_registry() -> PeerRegistry {
    Arc::new(DashMap::new())
}
