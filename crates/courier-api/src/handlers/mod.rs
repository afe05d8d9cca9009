//! HTTP handlers: the websocket entry point and read-only relay state.

pub mod status;
pub mod ws;

use std::sync::Arc;

use axum::http::{header, HeaderMap};

use courier_services::{HubHandle, SessionStore};

pub use status::handle_status;
pub use ws::handle_ws;

#[derive(Clone)]
pub struct ApiState {
    pub hub: HubHandle,
    pub sessions: Arc<dyn SessionStore>,
    /// Name of the cookie carrying the session id.
    pub session_cookie: String,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Value of cookie `name` across all `Cookie` headers. Empty values count as
/// absent.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
