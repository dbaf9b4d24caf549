pub mod handlers;

use std::future::Future;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Build the HTTP surface: `/ws` for clients, `/config/*` for the chain
/// document, `/status`, and 404 for everything else.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let config_routes = Router::new().route("/current", get(handlers::handle_config_current));

    Router::new()
        .route("/ws", get(handlers::handle_ws))
        .route("/status", get(handlers::handle_status))
        .nest("/config", config_routes)
        .fallback(handlers::handle_not_found)
        .with_state(state)
        .layer(cors)
}

pub async fn serve(
    state: ApiState,
    listen_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
