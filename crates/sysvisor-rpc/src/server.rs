//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use sysvisor_core::Supervisor;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0)
/// and the serving task. The server stops accepting once the supervisor's
/// session has ended and the task finishes after in-flight responses are
/// written.
pub async fn start_server(
    supervisor: Arc<Supervisor>,
    host: &str,
    port: u16,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let app = router(Arc::new(AppState {
        supervisor: Arc::clone(&supervisor),
    }));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { supervisor.session_ended().await })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, task))
}
