//! Interactive end-to-end encrypted chat over the relay websocket.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use courier_core::config::ExchangeConfig;
use courier_core::{Envelope, MessageKind};
use courier_services::{ExchangeError, KeyExchange};

use super::render;

pub struct ChatOptions {
    pub server_url: String,
    pub session_cookie: String,
    pub session_id: String,
    pub exchange: ExchangeConfig,
}

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Users,
    Help,
    Empty,
    UnknownCommand(&'a str),
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    match trimmed {
        "" => Input::Empty,
        "/quit" | "/q" => Input::Quit,
        "/users" | "/list users" => Input::Users,
        "/help" | "/h" => Input::Help,
        cmd if cmd.starts_with('/') => Input::UnknownCommand(cmd),
        text => Input::Text(text),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /users   List peers whose keys are known");
    println!("  /help    Show this help");
    println!("  /quit    Disconnect");
    println!("Anything else is encrypted separately for every known peer.");
}

pub async fn cmd_chat(opts: ChatOptions) -> Result<()> {
    let ChatOptions {
        server_url,
        session_cookie,
        session_id,
        exchange: exchange_config,
    } = opts;

    let mut request = server_url
        .as_str()
        .into_client_request()
        .with_context(|| format!("invalid server url {}", server_url))?;
    let cookie = HeaderValue::from_str(&format!("{}={}", session_cookie, session_id))
        .context("session id is not a valid cookie value")?;
    request.headers_mut().insert(header::COOKIE, cookie);

    let (socket, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {} (is the session valid?)", server_url))?;
    let (mut sink, mut stream) = socket.split();

    // The relay confirms our identity before anything else reaches us.
    let identity = loop {
        let frame = stream
            .next()
            .await
            .context("connection closed before identity confirmation")?
            .context("websocket read failed")?;
        let Message::Text(text) = frame else {
            continue;
        };
        let envelope = Envelope::from_json(&text).context("unreadable frame from relay")?;
        if envelope.kind == MessageKind::UserInfo {
            break envelope.content;
        }
    };
    tracing::info!(url = %server_url, identity = %identity, "connected");
    println!("{}", render::notice(&format!("Connected as {}", identity)));

    println!("Generating session keypair...");
    let exchange = {
        let config = exchange_config.clone();
        tokio::task::spawn_blocking(move || KeyExchange::new(identity, &config))
            .await
            .context("key generation task failed")?
            .context("failed to generate session keypair")?
    };

    // ── Writer: outbox → websocket ───────────────────────────────────────────
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);
    exchange.attach(outbox_tx);
    let writer = tokio::spawn(async move {
        while let Some(text) = outbox_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::warn!(error = %e, "websocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // ── Reader: websocket → coordinator → terminal ───────────────────────────
    let mut reader = {
        let exchange = exchange.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => display(&exchange, &text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        })
    };

    exchange
        .share_public_key()
        .await
        .context("failed to share public key")?;
    let key_request = {
        let exchange = exchange.clone();
        let delay = exchange_config.request_keys_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = exchange.request_keys().await {
                tracing::warn!(error = %e, "key request failed");
            }
        })
    };

    println!("Type a message and press enter. /help for commands.");
    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Help => print_help(),
                    Input::Users => println!("{}", render::peers(&exchange.known_peers())),
                    Input::UnknownCommand(cmd) => println!("Unknown command: {} (try /help)", cmd),
                    Input::Text(text) => send(&exchange, text).await?,
                }
            }

            _ = &mut reader => {
                println!("{}", render::notice("Connection closed by server"));
                break;
            }
        }
    }

    key_request.abort();
    exchange.shutdown();
    reader.abort();
    if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
        tracing::debug!("writer did not finish in time");
    }
    Ok(())
}

/// Read stdin on a dedicated thread; the channel closes on EOF.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn send(exchange: &KeyExchange, text: &str) -> Result<()> {
    match exchange.send_encrypted_message(text).await {
        Ok(recipients) if recipients.is_empty() => {
            println!("{}", render::notice("No peers with known keys yet; message not sent"));
        }
        Ok(_) => println!("{}", render::own_line(exchange.identity(), text)),
        Err(ExchangeError::NoTransport) => {
            println!("{}", render::notice("Not connected; message not sent"));
        }
        Err(e) => return Err(e).context("failed to send message"),
    }
    Ok(())
}

fn display(exchange: &KeyExchange, raw: &str) {
    match exchange.handle_message(raw) {
        Ok(Some(incoming)) => println!("{}", render::incoming(&incoming)),
        Ok(None) => {}
        Err(ExchangeError::InvalidKeyFormat { sender, source }) => {
            tracing::warn!(sender = %sender, error = %source, "discarding invalid public key");
        }
        Err(e) => tracing::warn!(error = %e, "unreadable frame"),
    }
}
