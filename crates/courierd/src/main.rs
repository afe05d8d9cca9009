//! courierd: end-to-end encrypted chat relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use courier_api::ApiState;
use courier_core::config::CourierConfig;
use courier_services::{Hub, SessionStore};

mod store;

use store::SqliteSessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CourierConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CourierConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CourierConfig::default()
    });
    tracing::info!(bind = %config.server.bind, port = config.server.port, "courierd starting");

    let db_path = &config.auth.database_path;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let sessions = Arc::new(
        SqliteSessionStore::open(db_path)
            .with_context(|| format!("failed to open session store {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "session store ready");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (hub, hub_handle) = Hub::new(&config.hub);
    let hub_task = tokio::spawn(hub.run(shutdown_tx.subscribe()));

    let api_task = {
        let state = ApiState {
            hub: hub_handle,
            sessions: sessions.clone(),
            session_cookie: config.auth.session_cookie.clone(),
        };
        let bind = config.server.bind.clone();
        let port = config.server.port;
        tokio::spawn(async move {
            if let Err(e) = courier_api::serve(state, &bind, port).await {
                tracing::error!(error = %e, "relay server failed");
            }
        })
    };

    let cleanup_task = tokio::spawn(cleanup_loop(
        sessions,
        Duration::from_secs(config.auth.cleanup_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    ));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = hub_task           => tracing::error!("hub exited: {:?}", r),
        r = api_task           => tracing::error!("relay server exited: {:?}", r),
        r = cleanup_task       => tracing::error!("session cleanup exited: {:?}", r),
    }

    Ok(())
}

/// Periodically purge expired sessions.
async fn cleanup_loop(
    store: Arc<SqliteSessionStore>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("session cleanup shutting down");
                return;
            }

            _ = interval.tick() => {
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.cleanup_expired()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => tracing::info!(removed, "expired sessions removed"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "session cleanup failed"),
                    Err(e) => tracing::warn!(error = %e, "session cleanup task panicked"),
                }
            }
        }
    }
}
