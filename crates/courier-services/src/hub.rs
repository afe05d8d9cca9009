//! Connection hub: the registry of connected peers and the fan-out router.
//!
//! All registry mutation happens on the hub's event loop: register,
//! unregister and broadcast arrive as [`HubEvent`]s over one bounded queue and
//! are applied one at a time. Observers read the registry directly through
//! [`HubHandle`]; `DashMap` shards give them shared read access without going
//! through the event path.
//!
//! Delivery never waits. A peer whose outbound queue is full or closed when a
//! frame is offered is evicted and announced as having left.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use courier_core::config::HubConfig;
use courier_core::{Envelope, MessageKind};

use crate::peer::{new_registry, OutboundQueue, PeerEntry, PeerId, PeerRegistry};

/// Work for the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    Register(PeerEntry),
    Unregister(PeerId),
    /// A raw envelope as read off a peer's transport.
    Broadcast(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub event loop has stopped")]
    Closed,
}

pub struct Hub {
    registry: PeerRegistry,
    events: mpsc::Receiver<HubEvent>,
}

/// Cloneable front door to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: PeerRegistry,
    queue_capacity: usize,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub identity: String,
    pub connected_secs: u64,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let registry = new_registry();
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            registry: registry.clone(),
            events: rx,
        };
        let handle = HubHandle {
            events: tx,
            registry,
            queue_capacity: config.queue_capacity,
        };
        (hub, handle)
    }

    /// Apply events until shutdown or until every handle is dropped.
    /// Remaining peers are dropped on exit, closing their queues.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("hub started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("hub shutting down");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        tracing::info!("all hub handles dropped");
                        break;
                    }
                },
            }
        }
        self.registry.clear();
    }

    /// Apply one event. The only path that mutates the registry.
    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(entry) => self.register(entry),
            HubEvent::Unregister(id) => self.unregister(id),
            HubEvent::Broadcast(frame) => self.broadcast(frame),
        }
    }

    fn register(&mut self, entry: PeerEntry) {
        let info = Bytes::from(Envelope::user_info(&entry.identity).to_bytes());
        if let Err(reason) = entry.offer(info) {
            tracing::warn!(peer_id = entry.id, identity = %entry.identity, %reason, "peer gone before registration");
            return;
        }

        let notice = notice(&entry.identity, "joined");
        tracing::info!(peer_id = entry.id, identity = %entry.identity, peers = self.registry.len() + 1, "peer registered");
        self.registry.insert(entry.id, entry);
        self.broadcast(notice);
    }

    fn unregister(&mut self, id: PeerId) {
        let Some((_, entry)) = self.registry.remove(&id) else {
            return;
        };
        tracing::info!(peer_id = id, identity = %entry.identity, peers = self.registry.len(), "peer unregistered");
        let notice = notice(&entry.identity, "left");
        drop(entry);
        self.broadcast(notice);
    }

    fn broadcast(&mut self, frame: Bytes) {
        let mut pending = VecDeque::from([frame]);

        while let Some(frame) = pending.pop_front() {
            let envelope = match Envelope::from_bytes(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, len = frame.len(), "dropping malformed envelope");
                    continue;
                }
            };
            let skip_sender = envelope.kind == MessageKind::EncryptedMessage;

            let mut unreachable = Vec::new();
            let mut delivered = 0usize;
            for peer in self.registry.iter() {
                if skip_sender && peer.identity == envelope.sender {
                    continue;
                }
                match peer.offer(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(reason) => unreachable.push((peer.id, reason)),
                }
            }

            // Removal after iteration; a shard guard is held while iterating.
            for (id, reason) in unreachable {
                if let Some((_, entry)) = self.registry.remove(&id) {
                    tracing::warn!(peer_id = id, identity = %entry.identity, %reason, "evicting peer");
                    pending.push_back(notice(&entry.identity, "left"));
                }
            }

            tracing::debug!(kind = %envelope.kind, sender = %envelope.sender, delivered, "broadcast");
        }
    }
}

fn notice(identity: &str, verb: &str) -> Bytes {
    Bytes::from(Envelope::system(format!("User {identity} {verb} the chat")).to_bytes())
}

impl HubHandle {
    /// Register a new connection. Returns its id and the receiving end of its
    /// outbound queue.
    pub async fn register(
        &self,
        identity: impl Into<String>,
    ) -> Result<(PeerId, OutboundQueue), HubError> {
        let (entry, rx) = PeerEntry::new(identity, self.queue_capacity);
        let id = entry.id;
        self.send(HubEvent::Register(entry)).await?;
        Ok((id, rx))
    }

    pub async fn unregister(&self, id: PeerId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    pub async fn broadcast(&self, frame: Bytes) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(frame)).await
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }

    /// True once the hub loop has exited.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Connected identities, sorted and deduplicated.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> =
            self.registry.iter().map(|p| p.identity.clone()).collect();
        identities.sort();
        identities.dedup();
        identities
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self
            .registry
            .iter()
            .map(|p| PeerSnapshot {
                id: p.id,
                identity: p.identity.clone(),
                connected_secs: p.connected_at.elapsed().as_secs(),
            })
            .collect();
        peers.sort_by_key(|p| p.id);
        peers
    }
}
