use crate::*;

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Error as WsError;

#[tokio::test]
async fn upgrade_without_valid_session_is_rejected() {
    let relay = start_relay().await;

    for session in [None, Some("forged-session")] {
        match connect(&relay, session).await {
            Err(WsError::Http(resp)) => assert_eq!(resp.status(), 401),
            Err(other) => panic!("expected HTTP 401, got {other:?}"),
            Ok(_) => panic!("upgrade accepted for {session:?}"),
        }
    }
    assert_eq!(relay.hub.peer_count(), 0);
}

#[tokio::test]
async fn revoked_session_cannot_connect() {
    let relay = start_relay().await;
    let session = relay.login("alice");
    relay.sessions.revoke(&session);
    assert!(connect(&relay, Some(&session)).await.is_err());
}

#[tokio::test]
async fn new_peer_gets_identity_then_join_notice() -> Result<()> {
    let relay = start_relay().await;
    let session = relay.login("alice");
    let mut alice = connect(&relay, Some(&session)).await?;

    let first = next_envelope(&mut alice).await?;
    assert_eq!(first.kind, MessageKind::UserInfo);
    assert_eq!(first.content, "alice");
    assert_eq!(first.sender, "System");

    let second = next_envelope(&mut alice).await?;
    assert_eq!(second.kind, MessageKind::System);
    assert_eq!(second.content, "User alice joined the chat");
    Ok(())
}

#[tokio::test]
async fn join_and_leave_are_announced() -> Result<()> {
    let relay = start_relay().await;
    let mut alice = join(&relay, "alice").await?;
    let mut bob = join(&relay, "bob").await?;
    expect_notice(&mut alice, "User bob joined the chat").await?;

    bob.close(None).await?;
    expect_notice(&mut alice, "User bob left the chat").await?;
    assert!(wait_until(|| relay.hub.identities() == vec!["alice"]).await);
    Ok(())
}

#[tokio::test]
async fn relay_fills_sender_and_timestamp() -> Result<()> {
    let relay = start_relay().await;
    let mut alice = join(&relay, "alice").await?;
    let mut bob = join(&relay, "bob").await?;

    alice
        .send(Message::Text(r#"{"type":"message","content":"hi"}"#.into()))
        .await?;

    let got = next_of_kind(&mut bob, MessageKind::Other("message".into())).await?;
    assert_eq!(got.sender, "alice");
    assert_eq!(got.content, "hi");
    assert!(got.timestamp > 0);
    Ok(())
}

#[tokio::test]
async fn encrypted_message_skips_its_sender() -> Result<()> {
    let relay = start_relay().await;
    let mut alice = join(&relay, "alice").await?;
    let mut bob = join(&relay, "bob").await?;
    expect_notice(&mut alice, "User bob joined the chat").await?;

    let encrypted = Envelope::encrypted("alice", "bob", "CIPHERTEXT");
    alice.send(Message::Text(encrypted.to_json())).await?;
    // Per-peer order is preserved, so an echo would arrive before this marker.
    let marker = Envelope::public_key_share("alice", "marker");
    alice.send(Message::Text(marker.to_json())).await?;

    let at_bob = next_of_kind(&mut bob, MessageKind::EncryptedMessage).await?;
    assert_eq!(at_bob.recipient.as_deref(), Some("bob"));

    let at_alice = next_envelope(&mut alice).await?;
    assert_eq!(at_alice.kind, MessageKind::PublicKeyShare);
    assert_eq!(at_alice.content, "marker");
    Ok(())
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() -> Result<()> {
    let relay = start_relay().await;
    let mut alice = join(&relay, "alice").await?;
    let mut bob = join(&relay, "bob").await?;

    alice.send(Message::Text("definitely not json".into())).await?;
    alice
        .send(Message::Text(Envelope::request_keys("alice").to_json()))
        .await?;

    let got = next_of_kind(&mut bob, MessageKind::RequestKeys).await?;
    assert_eq!(got.sender, "alice");
    assert_eq!(relay.hub.peer_count(), 2);
    Ok(())
}
