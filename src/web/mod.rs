//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::probe::HttpChecker;
use crate::scheduler::Monitor;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub monitor: Arc<Monitor>,
    pub checker: Arc<HttpChecker>,
}

/// API server for healthwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, monitor: Arc<Monitor>, checker: Arc<HttpChecker>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                monitor,
                checker,
            },
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        let protected = Router::new()
            .route(
                "/api/endpoints",
                get(handlers::handle_get_endpoints).post(handlers::handle_create_endpoint),
            )
            .route(
                "/api/endpoints/{id}",
                get(handlers::handle_get_endpoint)
                    .put(handlers::handle_update_endpoint)
                    .delete(handlers::handle_delete_endpoint),
            )
            .route("/api/endpoints/{id}/check", post(handlers::handle_check_endpoint))
            .route("/api/endpoints/{id}/history", get(handlers::handle_get_history))
            .route("/api/endpoints/{id}/stats", get(handlers::handle_get_stats))
            .route("/api/check-all", post(handlers::handle_check_all))
            .route("/api/monitor", get(handlers::handle_monitor_status))
            .route("/api/summary", get(handlers::handle_summary))
            .route(
                "/api/settings",
                get(handlers::handle_get_settings).put(handlers::handle_update_settings),
            )
            .route("/api/health/check", post(handlers::handle_adhoc_check))
            .route_layer(middleware::from_fn_with_state(self.state.clone(), require_token));

        Router::new()
            .route("/api/health/public", get(handlers::handle_public_endpoints))
            .merge(protected)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.router();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Allow/deny gate: a configured token must be presented as a bearer token.
async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_token.as_deref() else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}
