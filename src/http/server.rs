//! HTTP server implementation.

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use super::handlers::{self, AppState};
use crate::error::{RatekeeperError, Result};
use crate::policy::PolicyEvaluator;
use crate::ratelimit::RateLimiter;

/// Build the service router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check", post(handlers::check))
        .route(
            "/admin/limiters",
            get(handlers::list_limiters)
                .post(handlers::configure_limiter)
                .patch(handlers::update_limiter),
        )
        .route(
            "/admin/policies",
            post(handlers::add_policies).put(handlers::replace_policies),
        )
        .route("/admin/snapshot", get(handlers::snapshot))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// HTTP server for the admission control service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// State shared with the handlers
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        addr: SocketAddr,
        limiter: Arc<RateLimiter>,
        policies: Arc<PolicyEvaluator>,
    ) -> Self {
        Self {
            addr,
            state: AppState { limiter, policies },
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                RatekeeperError::Server(e.to_string())
            })
    }
}
