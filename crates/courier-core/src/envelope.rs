//! Wire envelope: the only unit ever placed on a connection.
//!
//! Encoded as a JSON object with the fields `type`, `content`, `sender`,
//! `recipient` (omitted unless set) and `timestamp` (seconds since epoch).
//! The browser client encodes the same object, so field names and omission
//! rules are a compatibility contract.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Sender name used on server-originated envelopes.
pub const SYSTEM_SENDER: &str = "System";

/// Message type discriminator.
///
/// Five known types plus a passthrough for anything else, so new types can
/// be routed before every participant understands them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Server-originated notice (joins, leaves).
    System,
    /// Content is an exported public key.
    PublicKeyShare,
    /// Asks every peer to re-share its public key. No content.
    RequestKeys,
    /// Content is ciphertext for `recipient`.
    EncryptedMessage,
    /// Server → client identity confirmation.
    UserInfo,
    /// Any other type string, preserved verbatim.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::PublicKeyShare => "public_key_share",
            Self::RequestKeys => "request_keys",
            Self::EncryptedMessage => "encrypted_message",
            Self::UserInfo => "user_info",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Self::System,
            "public_key_share" => Self::PublicKeyShare,
            "request_keys" => Self::RequestKeys,
            "encrypted_message" => Self::EncryptedMessage,
            "user_info" => Self::UserInfo,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat envelope.
///
/// Missing fields decode to their zero values; `recipient` is `None` when
/// absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    /// Ciphertext, an exported public key, or plain text depending on `kind`.
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub sender: String,

    /// Present only for `encrypted_message`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub recipient: Option<String>,

    /// Seconds since the Unix epoch. Zero means "not set".
    #[serde(default)]
    pub timestamp: i64,
}

/// The bytes on the wire did not decode to an [`Envelope`].
#[derive(Debug, thiserror::Error)]
#[error("malformed envelope: {0}")]
pub struct MalformedEnvelope(#[from] serde_json::Error);

impl Envelope {
    fn new(kind: MessageKind, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            sender: sender.into(),
            recipient: None,
            timestamp: now_secs(),
        }
    }

    /// Server notice, e.g. a join or leave announcement.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, SYSTEM_SENDER, content)
    }

    /// Tells a freshly connected peer which identity the server resolved for it.
    pub fn user_info(identity: impl Into<String>) -> Self {
        Self::new(MessageKind::UserInfo, SYSTEM_SENDER, identity)
    }

    pub fn public_key_share(sender: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self::new(MessageKind::PublicKeyShare, sender, public_key)
    }

    pub fn request_keys(sender: impl Into<String>) -> Self {
        Self::new(MessageKind::RequestKeys, sender, String::new())
    }

    pub fn encrypted(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        ciphertext: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::new(MessageKind::EncryptedMessage, sender, ciphertext);
        envelope.recipient = Some(recipient.into());
        envelope
    }

    /// Fill `sender` and `timestamp` when the client left them unset.
    pub fn fill_defaults(&mut self, sender: &str) {
        if self.sender.is_empty() {
            self.sender = sender.to_string();
        }
        if self.timestamp == 0 {
            self.timestamp = now_secs();
        }
    }

    /// Key used by receivers to drop replayed envelopes.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}", self.sender, self.content, self.timestamp)
    }

    /// Serialize to JSON bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope serialization failed")
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization failed")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MalformedEnvelope> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn from_json(text: &str) -> Result<Self, MalformedEnvelope> {
        Ok(serde_json::from_str(text)?)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Current Unix time in whole seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
