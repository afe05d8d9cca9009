//! courier-ctl: terminal chat client and status tool for courierd.

mod cmd;

use anyhow::{Context, Result};

use courier_core::config::CourierConfig;

use cmd::chat::{cmd_chat, ChatOptions};
use cmd::status::cmd_status;

fn print_usage() {
    println!("Usage: courier-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  chat          Join the chat (needs a session id)");
    println!("  status        Show connected peers");
    println!();
    println!("Options:");
    println!("  --server <url>    Websocket endpoint (default from config)");
    println!("  --api <url>       HTTP API base URL (default from config)");
    println!("  --session <id>    Session id, or set COURIER_SESSION");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = CourierConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CourierConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut server_url = config.client.server_url.clone();
    let mut api_url = config.client.api_url.clone();
    let mut session_id = std::env::var("COURIER_SESSION").ok();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                i += 1;
                server_url = args.get(i).context("--server requires a value")?.clone();
            }
            "--api" => {
                i += 1;
                api_url = args.get(i).context("--api requires a value")?.clone();
            }
            "--session" => {
                i += 1;
                session_id = Some(args.get(i).context("--session requires a value")?.clone());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["chat"] => {
            let session_id = session_id.context("chat needs --session <id> or COURIER_SESSION")?;
            cmd_chat(ChatOptions {
                server_url,
                session_cookie: config.auth.session_cookie.clone(),
                session_id,
                exchange: config.exchange.clone(),
            })
            .await
        }
        ["status"] | [] => cmd_status(&api_url).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
