pub mod deferred;
pub mod exchange;
pub mod hub;
pub mod peer;
pub mod session;
pub mod store;

pub use exchange::{ExchangeError, Incoming, KeyExchange, KnownPeer};
pub use hub::{Hub, HubError, HubEvent, HubHandle, PeerSnapshot};
pub use peer::{OutboundQueue, PeerEntry, PeerId, PeerRegistry, PeerUnreachable};
pub use session::PeerSession;
pub use store::{MemorySessionStore, SessionStore, StoreError};
