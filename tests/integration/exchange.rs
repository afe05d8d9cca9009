use crate::*;

use std::sync::OnceLock;

use futures::SinkExt;
use tokio::sync::mpsc;

use courier_core::config::ExchangeConfig;
use courier_core::crypto::Keypair;
use courier_services::{Incoming, KeyExchange};

fn keypair(slot: usize) -> Arc<Keypair> {
    static KEYS: OnceLock<Vec<Arc<Keypair>>> = OnceLock::new();
    KEYS.get_or_init(|| {
        (0..2)
            .map(|_| Arc::new(Keypair::generate().unwrap()))
            .collect()
    })[slot]
        .clone()
}

/// A coordinator wired to a live websocket, surfacing displayable envelopes.
struct ChatClient {
    exchange: KeyExchange,
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl ChatClient {
    async fn join(relay: &Relay, identity: &str, slot: usize) -> Result<Self> {
        let client = crate::join(relay, identity).await?;
        let (mut sink, mut stream) = client.split();

        let exchange =
            KeyExchange::with_keypair(identity, keypair(slot), &ExchangeConfig::default());
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);
        exchange.attach(outbox_tx);

        tokio::spawn(async move {
            while let Some(text) = outbox_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let reader = exchange.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(Some(shown)) = reader.handle_message(&text) {
                        let _ = incoming_tx.send(shown);
                    }
                }
            }
        });

        exchange.share_public_key().await?;
        Ok(Self { exchange, incoming })
    }

    fn knows(&self, identity: &str) -> bool {
        self.exchange
            .known_peers()
            .iter()
            .any(|p| p.identity == identity)
    }

    async fn next_message(&mut self) -> Result<(String, String)> {
        loop {
            let incoming = tokio::time::timeout(Duration::from_secs(10), self.incoming.recv())
                .await
                .context("timed out waiting for a message")?
                .context("reader stopped")?;
            if let Incoming::Message { sender, text, .. } = incoming {
                return Ok((sender, text));
            }
        }
    }
}

#[tokio::test]
async fn late_joiner_converges_and_messages_decrypt() -> Result<()> {
    let relay = start_relay().await;
    let mut alice = ChatClient::join(&relay, "alice", 0).await?;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let mut bob = ChatClient::join(&relay, "bob", 1).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    bob.exchange.request_keys().await?;

    assert!(wait_until(|| alice.knows("bob") && bob.knows("alice")).await);

    let recipients = alice.exchange.send_encrypted_message("hello bob").await?;
    assert_eq!(recipients, vec!["bob"]);
    assert_eq!(bob.next_message().await?, ("alice".to_string(), "hello bob".to_string()));

    let long: String = "0123456789".repeat(500);
    bob.exchange.send_encrypted_message(&long).await?;
    assert_eq!(alice.next_message().await?, ("bob".to_string(), long));
    Ok(())
}

#[tokio::test]
async fn handshake_settles() -> Result<()> {
    let relay = start_relay().await;
    let alice = ChatClient::join(&relay, "alice", 0).await?;
    let bob = ChatClient::join(&relay, "bob", 1).await?;
    bob.exchange.request_keys().await?;
    assert!(wait_until(|| alice.knows("bob") && bob.knows("alice")).await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let settled = alice.exchange.shares_sent() + bob.exchange.shares_sent();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(alice.exchange.shares_sent() + bob.exchange.shares_sent(), settled);
    assert!(settled <= 4, "share storm: {settled} shares");
    Ok(())
}
