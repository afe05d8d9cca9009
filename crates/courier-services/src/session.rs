//! Peer session: bridges one duplex transport to the hub.
//!
//! Two loops run concurrently for the lifetime of a connection:
//!
//! - inbound: transport → decode → fill `sender`/`timestamp` → hub broadcast.
//!   Ends on read error or close.
//! - outbound: outbound queue → transport, in enqueue order. Ends when the
//!   queue closes, when the registry entry is dropped (unregister or
//!   eviction, even mid-write), or when a write fails.
//!
//! Whichever loop ends first ends the session: the peer is unregistered and
//! the transport closed.
//!
//! The transport is any `Stream` of frames plus any `Sink` of frames, so the
//! websocket layer and tests plug in the same way.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};

use courier_core::Envelope;

use crate::hub::{HubError, HubHandle};
use crate::peer::{OutboundQueue, PeerId};

pub struct PeerSession {
    hub: HubHandle,
    id: PeerId,
    identity: String,
    outbound: OutboundQueue,
}

impl PeerSession {
    /// Register `identity` with the hub. The identity has already been
    /// authenticated by the caller.
    pub async fn start(hub: &HubHandle, identity: impl Into<String>) -> Result<Self, HubError> {
        let identity = identity.into();
        let (id, outbound) = hub.register(identity.clone()).await?;
        Ok(Self {
            hub: hub.clone(),
            id,
            identity,
            outbound,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Drive the session until either loop ends.
    pub async fn run<R, E, W>(self, reader: R, mut writer: W)
    where
        R: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
        W: Sink<Bytes> + Unpin,
        W::Error: Display,
    {
        let Self {
            hub,
            id,
            identity,
            mut outbound,
        } = self;

        tracing::debug!(peer_id = id, identity = %identity, "session started");
        tokio::select! {
            _ = inbound_loop(&hub, id, &identity, reader) => {}
            _ = outbound_loop(id, &mut outbound, &mut writer) => {}
        }

        // No-op when the hub already evicted this peer.
        let _ = hub.unregister(id).await;
        outbound.close();
        tokio::select! {
            biased;
            closed = writer.close() => {
                if let Err(e) = closed {
                    tracing::debug!(peer_id = id, error = %e, "transport close failed");
                }
            }
            _ = outbound.removed() => {
                tracing::debug!(peer_id = id, "transport close abandoned");
            }
        }
        tracing::debug!(peer_id = id, identity = %identity, "session ended");
    }
}

async fn inbound_loop<R, E>(hub: &HubHandle, id: PeerId, identity: &str, mut reader: R)
where
    R: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    while let Some(item) = reader.next().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(peer_id = id, error = %e, "transport read failed");
                break;
            }
        };

        let mut envelope = match Envelope::from_bytes(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(peer_id = id, identity, error = %e, "dropping malformed envelope");
                continue;
            }
        };
        envelope.fill_defaults(identity);

        if hub.broadcast(Bytes::from(envelope.to_bytes())).await.is_err() {
            tracing::warn!(peer_id = id, "hub closed, ending session");
            break;
        }
    }
}

async fn outbound_loop<W>(id: PeerId, outbound: &mut OutboundQueue, writer: &mut W)
where
    W: Sink<Bytes> + Unpin,
    W::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        tokio::select! {
            biased;
            sent = writer.send(frame) => {
                if let Err(e) = sent {
                    tracing::debug!(peer_id = id, error = %e, "transport write failed");
                    break;
                }
            }
            _ = outbound.removed() => {
                tracing::debug!(peer_id = id, "peer removed during a pending write");
                break;
            }
        }
    }
}
