//! Key exchange coordinator: one per connected client session.
//!
//! Owns the session keypair, the table of remote public keys, the dedup set
//! and the timers that keep the handshake from turning into a share storm.
//!
//! Handshake rules:
//!
//! - A `public_key_share` with a key we did not have is stored. If our own
//!   share cooldown is not active, we re-share after `reshare_delay`.
//! - A `request_keys` from someone else re-shares after `reshare_delay`,
//!   regardless of cooldown.
//! - At most one re-share is pending at a time; further triggers fold into it.
//!
//! Re-shares run as [`Deferred`] callbacks holding only a weak reference, so a
//! torn-down coordinator never fires one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::time::Instant;

use courier_core::config::ExchangeConfig;
use courier_core::crypto::{self, CryptoError, Keypair, RsaPublicKey};
use courier_core::{Envelope, MalformedEnvelope, MessageKind};

use crate::deferred::Deferred;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Send attempted before `attach` or after the transport went away.
    #[error("not connected")]
    NoTransport,
    /// A peer shared something that is not a public key. Its share is discarded.
    #[error("invalid public key from {sender}: {source}")]
    InvalidKeyFormat {
        sender: String,
        #[source]
        source: CryptoError,
    },
    #[error(transparent)]
    Malformed(#[from] MalformedEnvelope),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// An envelope worth showing to the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    System {
        content: String,
        timestamp: i64,
    },
    /// The relay confirmed which identity it resolved for us.
    UserInfo { identity: String },
    Message {
        sender: String,
        text: String,
        timestamp: i64,
    },
    /// Addressed to us but could not be decrypted.
    Undecryptable {
        sender: String,
        error: String,
        timestamp: i64,
    },
    /// Plain `message` or any type this client does not interpret.
    Other {
        kind: MessageKind,
        sender: String,
        content: String,
        timestamp: i64,
    },
}

/// A remote identity whose key we hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPeer {
    pub identity: String,
    pub public_key: String,
    /// Our key has been shared since this peer's key was learned.
    pub shared: bool,
}

struct RemoteKey {
    exported: String,
    key: RsaPublicKey,
}

#[derive(Default)]
struct ExchangeState {
    known: HashMap<String, RemoteKey>,
    shared_with: HashSet<String>,
    last_shared: Option<Instant>,
    share_pending: bool,
    shares_sent: u64,
    // Never evicted; lives as long as the session.
    seen: HashSet<[u8; 32]>,
}

struct Inner {
    identity: String,
    keypair: Arc<Keypair>,
    config: ExchangeConfig,
    state: Mutex<ExchangeState>,
    outbox: Mutex<Option<mpsc::Sender<String>>>,
    deferred: Deferred,
}

#[derive(Clone)]
pub struct KeyExchange {
    inner: Arc<Inner>,
}

impl KeyExchange {
    /// Generate a fresh session keypair. Blocks for the duration of RSA key
    /// generation.
    pub fn new(identity: impl Into<String>, config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let keypair = Keypair::generate()?;
        Ok(Self::with_keypair(identity, Arc::new(keypair), config))
    }

    pub fn with_keypair(
        identity: impl Into<String>,
        keypair: Arc<Keypair>,
        config: &ExchangeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity: identity.into(),
                keypair,
                config: config.clone(),
                state: Mutex::new(ExchangeState::default()),
                outbox: Mutex::new(None),
                deferred: Deferred::new(),
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn public_key(&self) -> &str {
        self.inner.keypair.exported_public_key()
    }

    /// Set the channel outbound text frames are written to.
    pub fn attach(&self, outbox: mpsc::Sender<String>) {
        *self.outbox() = Some(outbox);
    }

    pub fn detach(&self) {
        self.outbox().take();
    }

    /// Detach and cancel pending re-shares.
    pub fn shutdown(&self) {
        self.detach();
        self.inner.deferred.cancel_all();
        self.state().share_pending = false;
    }

    /// Broadcast our public key.
    pub async fn share_public_key(&self) -> Result<(), ExchangeError> {
        let envelope = Envelope::public_key_share(&self.inner.identity, self.public_key());
        self.transmit(envelope).await?;

        let mut state = self.state();
        state.last_shared = Some(Instant::now());
        state.shared_with = state.known.keys().cloned().collect();
        state.shares_sent += 1;
        tracing::debug!(identity = %self.inner.identity, peers = state.known.len(), "public key shared");
        Ok(())
    }

    /// Ask every peer to re-share its key.
    pub async fn request_keys(&self) -> Result<(), ExchangeError> {
        self.transmit(Envelope::request_keys(&self.inner.identity)).await
    }

    /// Encrypt `text` separately for every known peer and send one envelope
    /// each. Returns the identities it was sent to. A peer whose encryption
    /// fails is skipped.
    pub async fn send_encrypted_message(&self, text: &str) -> Result<Vec<String>, ExchangeError> {
        let targets: Vec<(String, RsaPublicKey)> = {
            let state = self.state();
            let mut targets: Vec<_> = state
                .known
                .iter()
                .filter(|(identity, _)| **identity != self.inner.identity)
                .map(|(identity, remote)| (identity.clone(), remote.key.clone()))
                .collect();
            targets.sort_by(|a, b| a.0.cmp(&b.0));
            targets
        };

        let mut sent = Vec::with_capacity(targets.len());
        for (recipient, key) in targets {
            let ciphertext = match crypto::encrypt(text, &key) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "encryption failed, skipping recipient");
                    continue;
                }
            };
            let envelope = Envelope::encrypted(&self.inner.identity, &recipient, ciphertext);
            self.transmit(envelope).await?;
            sent.push(recipient);
        }
        Ok(sent)
    }

    /// Process one inbound text frame.
    ///
    /// Handshake traffic and envelopes for other recipients yield `Ok(None)`.
    pub fn handle_message(&self, raw: &str) -> Result<Option<Incoming>, ExchangeError> {
        let envelope = Envelope::from_json(raw)?;
        let own = envelope.sender == self.inner.identity;

        match envelope.kind {
            MessageKind::PublicKeyShare if !own => {
                self.learn_key(envelope.sender, envelope.content)?;
                Ok(None)
            }
            MessageKind::RequestKeys if !own => {
                tracing::debug!(from = %envelope.sender, "key request received");
                self.schedule_share(&mut self.state());
                Ok(None)
            }
            MessageKind::PublicKeyShare | MessageKind::RequestKeys => Ok(None),
            MessageKind::EncryptedMessage => Ok(self.receive_encrypted(envelope)),
            MessageKind::System => Ok(Some(Incoming::System {
                content: envelope.content,
                timestamp: envelope.timestamp,
            })),
            MessageKind::UserInfo => Ok(Some(Incoming::UserInfo {
                identity: envelope.content,
            })),
            kind @ MessageKind::Other(_) => Ok(Some(Incoming::Other {
                kind,
                sender: envelope.sender,
                content: envelope.content,
                timestamp: envelope.timestamp,
            })),
        }
    }

    /// Peers whose keys we hold, sorted by identity.
    pub fn known_peers(&self) -> Vec<KnownPeer> {
        let state = self.state();
        let mut peers: Vec<KnownPeer> = state
            .known
            .iter()
            .map(|(identity, remote)| KnownPeer {
                identity: identity.clone(),
                public_key: remote.exported.clone(),
                shared: state.shared_with.contains(identity),
            })
            .collect();
        peers.sort_by(|a, b| a.identity.cmp(&b.identity));
        peers
    }

    /// Number of times our key has actually gone out.
    pub fn shares_sent(&self) -> u64 {
        self.state().shares_sent
    }

    fn learn_key(&self, sender: String, exported: String) -> Result<(), ExchangeError> {
        let key = crypto::import_public_key(&exported).map_err(|source| {
            ExchangeError::InvalidKeyFormat {
                sender: sender.clone(),
                source,
            }
        })?;

        let mut state = self.state();
        let already_known = state
            .known
            .get(&sender)
            .is_some_and(|remote| remote.exported == exported);
        if already_known {
            return Ok(());
        }

        tracing::debug!(peer = %sender, "public key learned");
        state.shared_with.remove(&sender);
        state.known.insert(sender, RemoteKey { exported, key });

        let cooling_down = state
            .last_shared
            .is_some_and(|at| at.elapsed() < self.inner.config.share_cooldown());
        if !cooling_down {
            self.schedule_share(&mut state);
        }
        Ok(())
    }

    fn receive_encrypted(&self, envelope: Envelope) -> Option<Incoming> {
        if envelope.sender == self.inner.identity
            || envelope.recipient.as_deref() != Some(self.inner.identity.as_str())
        {
            return None;
        }

        let digest = *blake3::hash(envelope.fingerprint().as_bytes()).as_bytes();
        if !self.state().seen.insert(digest) {
            tracing::debug!(sender = %envelope.sender, digest = %hex::encode(&digest[..8]), "duplicate envelope dropped");
            return None;
        }

        Some(match self.inner.keypair.decrypt(&envelope.content) {
            Ok(text) => Incoming::Message {
                sender: envelope.sender,
                text,
                timestamp: envelope.timestamp,
            },
            Err(e) => {
                tracing::warn!(sender = %envelope.sender, error = %e, "decryption failed");
                Incoming::Undecryptable {
                    sender: envelope.sender,
                    error: e.to_string(),
                    timestamp: envelope.timestamp,
                }
            }
        })
    }

    fn schedule_share(&self, state: &mut ExchangeState) {
        if state.share_pending {
            return;
        }
        state.share_pending = true;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .deferred
            .schedule(self.inner.config.reshare_delay(), async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let exchange = KeyExchange { inner };
                // Triggers arriving while the share is in flight are covered by it.
                let shared = exchange.share_public_key().await;
                exchange.state().share_pending = false;
                if let Err(e) = shared {
                    tracing::warn!(error = %e, "deferred key share failed");
                }
            });
    }

    async fn transmit(&self, envelope: Envelope) -> Result<(), ExchangeError> {
        let outbox = self.outbox().clone().ok_or(ExchangeError::NoTransport)?;
        outbox
            .send(envelope.to_json())
            .await
            .map_err(|_| ExchangeError::NoTransport)
    }

    fn state(&self) -> MutexGuard<'_, ExchangeState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbox(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.inner.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}
