//! Terminal rendering of surfaced envelopes.

use chrono::{DateTime, Local};

use courier_core::MessageKind;
use courier_services::{Incoming, KnownPeer};

/// `HH:MM:SS` in local time. Zero means "now".
pub fn clock(timestamp: i64) -> String {
    let time = DateTime::from_timestamp(timestamp, 0)
        .filter(|_| timestamp > 0)
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(Local::now);
    time.format("%H:%M:%S").to_string()
}

pub fn incoming(msg: &Incoming) -> String {
    match msg {
        Incoming::System { content, timestamp } => {
            format!("[{}] [SYSTEM] {}", clock(*timestamp), content)
        }
        Incoming::UserInfo { identity } => {
            format!("[{}] [SYSTEM] Connected as {}", clock(0), identity)
        }
        Incoming::Message {
            sender,
            text,
            timestamp,
        } => format!("[{}] [{}] {}", clock(*timestamp), sender, text),
        Incoming::Undecryptable {
            sender,
            error,
            timestamp,
        } => format!("[{}] [{}] [DECRYPTION FAILED] {}", clock(*timestamp), sender, error),
        Incoming::Other {
            kind: MessageKind::Other(kind),
            sender,
            content,
            timestamp,
        } if kind != "message" => format!(
            "[{}] [{}] {} (type: {})",
            clock(*timestamp),
            sender,
            content,
            kind
        ),
        Incoming::Other {
            sender,
            content,
            timestamp,
            ..
        } => format!("[{}] [{}] {}", clock(*timestamp), sender, content),
    }
}

/// Local echo of our own line; the relay never sends it back.
pub fn own_line(identity: &str, text: &str) -> String {
    format!("[{}] [{}] {}", clock(0), identity, text)
}

pub fn notice(text: &str) -> String {
    format!("[{}] [SYSTEM] {}", clock(0), text)
}

pub fn peers(peers: &[KnownPeer]) -> String {
    if peers.is_empty() {
        return "No peers with known keys yet.".to_string();
    }
    let mut out = format!("Known peers ({}):", peers.len());
    for p in peers {
        let preview: String = p.public_key.chars().take(24).collect();
        let shared = if p.shared { "" } else { " (our key not yet shared)" };
        out.push_str(&format!("\n  {:<16} {}…{}", p.identity, preview, shared));
    }
    out
}
