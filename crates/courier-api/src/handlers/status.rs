//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::ApiState;

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub peers: usize,
    pub identities: Vec<String>,
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub peer_id: u64,
    pub identity: String,
    pub connected_secs: u64,
}

/// Reads the registry directly; never goes through the hub's event queue.
pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let connections: Vec<ConnectionInfo> = state
        .hub
        .snapshot()
        .into_iter()
        .map(|p| ConnectionInfo {
            peer_id: p.id,
            identity: p.identity,
            connected_secs: p.connected_secs,
        })
        .collect();

    Json(StatusResponse {
        peers: connections.len(),
        identities: state.hub.identities(),
        connections,
    })
}
