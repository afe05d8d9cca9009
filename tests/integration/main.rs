//! Courier integration test harness.
//!
//! Every test starts its own relay in-process on an ephemeral localhost port,
//! backed by an in-memory session store, and talks to it over real websocket
//! and HTTP connections.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use courier_api::ApiState;
use courier_core::config::HubConfig;
use courier_core::{Envelope, MessageKind};
use courier_services::{Hub, HubHandle, MemorySessionStore};

mod exchange;
mod relay;
mod status;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SESSION_COOKIE: &str = "courier_session";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Relay {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub sessions: Arc<MemorySessionStore>,
    shutdown: broadcast::Sender<()>,
}

impl Relay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Create a live session for `identity` and return its id.
    pub fn login(&self, identity: &str) -> String {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = format!("session-{}-{}", identity, NEXT.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(id.clone(), identity, Duration::from_secs(3600));
        id
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn start_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (hub, handle) = Hub::new(&HubConfig::default());
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(hub.run(shutdown.subscribe()));

    let sessions = Arc::new(MemorySessionStore::new());
    let state = ApiState {
        hub: handle.clone(),
        sessions: sessions.clone(),
        session_cookie: SESSION_COOKIE.to_string(),
    };
    tokio::spawn(courier_api::serve_listener(listener, state));

    Relay {
        addr,
        hub: handle,
        sessions,
        shutdown,
    }
}

/// Open a websocket carrying `session` as the session cookie.
pub async fn connect(
    relay: &Relay,
    session: Option<&str>,
) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = relay.ws_url().into_client_request()?;
    if let Some(session) = session {
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session}")).unwrap();
        request.headers_mut().insert(header::COOKIE, cookie);
    }
    let (client, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(client)
}

/// Log in and connect, consuming the identity confirmation.
pub async fn join(relay: &Relay, identity: &str) -> Result<Client> {
    let session = relay.login(identity);
    let mut client = connect(relay, Some(&session))
        .await
        .with_context(|| format!("{identity} failed to connect"))?;
    let info = next_of_kind(&mut client, MessageKind::UserInfo).await?;
    assert_eq!(info.content, identity);
    Ok(client)
}

pub async fn next_envelope(client: &mut Client) -> Result<Envelope> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .context("timed out waiting for a frame")?
            .context("connection closed")??;
        if let Message::Text(text) = msg {
            return Ok(Envelope::from_json(&text)?);
        }
    }
}

pub async fn next_of_kind(client: &mut Client, kind: MessageKind) -> Result<Envelope> {
    loop {
        let envelope = next_envelope(client).await?;
        if envelope.kind == kind {
            return Ok(envelope);
        }
    }
}

/// Wait for a system notice with exactly `content`.
pub async fn expect_notice(client: &mut Client, content: &str) -> Result<()> {
    loop {
        let envelope = next_of_kind(client, MessageKind::System).await?;
        if envelope.content == content {
            return Ok(());
        }
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
