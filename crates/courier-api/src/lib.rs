pub mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// `/ws` upgrade endpoint plus the read-only `/api` routes.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .with_state(state.clone());

    Router::new()
        .route("/ws", get(handlers::handle_ws))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(cors)
}

pub async fn serve(state: ApiState, bind: &str, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind, port)).await?;
    tracing::info!(bind, port, "relay listening");
    serve_listener(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve_listener(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}
