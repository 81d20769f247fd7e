//! HTTP Server Module
//!
//! Serves the gateway route (every method, both transports) and a health
//! endpoint.

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{any, get},
    Extension, Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::HttpConfig;
use crate::protocol::error::{GatewayError, GatewayResult};
use crate::protocol::gateway::Gateway;

use self::handlers::{admin, graphql};

/// Build the CORS layer. No layer at all means same-origin only.
fn cors_layer(config: &HttpConfig) -> Option<CorsLayer> {
    if !config.cors_origins.is_empty() {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| {
                let parsed = s.parse();
                if parsed.is_err() {
                    warn!(origin = %s, "invalid_cors_origin_ignored");
                }
                parsed.ok()
            })
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if config.cors_allow_all {
        Some(CorsLayer::permissive())
    } else {
        None
    }
}

/// Creates the Axum router
pub fn create_router(gateway: Arc<Gateway>) -> Router {
    let http = gateway.config().http.clone();

    let mut app = Router::new()
        .route("/health", get(admin::health))
        .route(&http.path, any(graphql::entry))
        .layer(Extension(gateway));

    if let Some(cors) = cors_layer(&http) {
        app = app.layer(cors);
    }

    app
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> GatewayResult<()> {
    let app = create_router(gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Listens for SIGINT (ctrl-c) and SIGTERM to trigger graceful shutdown.
/// Open WebSocket sessions are not waited on; their tasks end with the runtime.
pub async fn start_http_server(gateway: Arc<Gateway>) -> GatewayResult<()> {
    let http = &gateway.config().http;
    let addr: SocketAddr = format!("{}:{}", http.host, http.port)
        .parse()
        .map_err(|e| GatewayError::InvalidConfig(format!("invalid listen address: {e}")))?;

    info!(%addr, path = %http.path, "http_server_listening");

    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;

    serve(listener, Arc::clone(&gateway), shutdown_signal()).await?;

    let stats = gateway.session_stats();
    info!(
        active_sessions = stats.active_sessions,
        total_sessions = stats.total_sessions,
        "http_server_stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!(error = %e, "sigterm_handler_unavailable");
                    let _ = ctrl_c.await;
                    info!("received_sigint");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("received_sigint"),
            _ = sigterm.recv() => info!("received_sigterm"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received_sigint");
    }
}
