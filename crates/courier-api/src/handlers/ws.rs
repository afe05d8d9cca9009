//! /ws handler: authenticates the upgrade and hands the socket to a
//! [`PeerSession`].

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};

use courier_services::{PeerSession, StoreError};

use super::{cookie_value, ApiState};

pub async fn handle_ws(
    State(state): State<ApiState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match upgrade {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| serve_socket(state, identity, socket)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<Option<String>, StoreError> {
    let Some(session_id) = cookie_value(headers, &state.session_cookie) else {
        return Ok(None);
    };
    let store = state.sessions.clone();
    tokio::task::spawn_blocking(move || store.identity_for(&session_id))
        .await
        .map_err(StoreError::backend)?
}

async fn serve_socket(state: ApiState, identity: String, socket: WebSocket) {
    let session = match PeerSession::start(&state.hub, identity.as_str()).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "cannot register peer");
            return;
        }
    };
    let peer_id = session.id();
    tracing::info!(peer_id, identity = %identity, "websocket connected");

    let (sink, stream) = socket.split();

    let reader = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    // Envelopes are JSON, so every outbound frame is sent as text.
    let writer = sink.with(|frame: Bytes| {
        future::ready(
            String::from_utf8(frame.to_vec())
                .map(|text| Message::Text(text.into()))
                .map_err(axum::Error::new),
        )
    });

    session.run(Box::pin(reader), Box::pin(writer)).await;
    tracing::info!(peer_id, identity = %identity, "websocket disconnected");
}
