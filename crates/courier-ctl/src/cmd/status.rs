//! Relay status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::get_json;

#[derive(Deserialize)]
struct StatusResponse {
    peers: usize,
    identities: Vec<String>,
    #[serde(default)]
    connections: Vec<ConnectionInfo>,
}

#[derive(Deserialize)]
struct ConnectionInfo {
    peer_id: u64,
    identity: String,
    connected_secs: u64,
}

pub async fn cmd_status(api_url: &str) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", api_url.trim_end_matches('/'))).await?;

    println!("═══════════════════════════════════════");
    println!("  Courier Relay Status");
    println!("═══════════════════════════════════════");
    println!("  Connections : {}", resp.peers);
    println!("  Identities  : {}", resp.identities.len());

    if resp.connections.is_empty() {
        println!("\n  Nobody connected.");
    } else {
        println!("\n  Connections:");
        for c in &resp.connections {
            println!("  ┌─ #{}", c.peer_id);
            println!("  │  identity : {}", c.identity);
            println!("  └─ uptime   : {}s", c.connected_secs);
        }
    }

    Ok(())
}
