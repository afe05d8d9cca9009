use crate::*;

#[tokio::test]
async fn status_lists_connected_identities() -> Result<()> {
    let relay = start_relay().await;
    let _alice = join(&relay, "alice").await?;
    let _bob = join(&relay, "bob").await?;
    assert!(wait_until(|| relay.hub.peer_count() == 2).await);

    let status: serde_json::Value = reqwest::get(format!("{}/status", relay.api_url()))
        .await?
        .error_for_status()?
        .json()
        .await?;

    assert_eq!(status["peers"], 2);
    assert_eq!(status["identities"], serde_json::json!(["alice", "bob"]));
    assert_eq!(status["connections"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn status_on_idle_relay() -> Result<()> {
    let relay = start_relay().await;
    let status: serde_json::Value = reqwest::get(format!("{}/status", relay.api_url()))
        .await?
        .json()
        .await?;
    assert_eq!(status["peers"], 0);
    Ok(())
}
