//! courier-core: wire envelope, asymmetric cipher adapter, and configuration.
//! All other Courier crates depend on this one.

pub mod config;
pub mod crypto;
pub mod envelope;

pub use envelope::{Envelope, MalformedEnvelope, MessageKind, SYSTEM_SENDER};
