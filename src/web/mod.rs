//! Web layer module
//!
//! Thin axum handlers over [`JobService`]. Handlers parse parameters,
//! call one service method and wrap the result; errors become responses
//! through [`responses::handle_error`].
//!
//! - **Handlers**: HTTP request handlers organized by resource
//! - **Responses**: Standardized response envelope and status mapping
//! - **Extractors**: Query and body parameter types
//! - **Middleware**: Request logging

use anyhow::Result;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{delete, get, post},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::services::JobService;

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod responses;

pub use responses::{ApiResponse, handle_error};

/// Room for multipart boundaries and part headers on top of the upload cap
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
    pub config: Arc<Config>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(service: JobService, config: Config) -> Self {
        Self {
            service,
            config: Arc::new(config),
            start_time: chrono::Utc::now(),
        }
    }
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = create_router(state);
        Ok(Self { app, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `cancellation_token` is cancelled, then drain in-flight requests.
    pub async fn serve_with_cancellation(self, cancellation_token: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Web server listening on http://{}", self.addr);

        let shutdown_signal = async move {
            cancellation_token.cancelled().await;
            info!("Web server received cancellation signal, shutting down gracefully");
        };

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        info!("Web server stopped");
        Ok(())
    }
}

fn to_usize(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// CORS from the configured origins. `*` allows any origin; credentials are never allowed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_DISPOSITION]);

    if origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Create the router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let storage = &state.config.storage;
    let upload_limit = to_usize(storage.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD));
    // Worst-case JSON escaping of the text cap, plus room for the envelope
    let json_limit = to_usize(storage.max_text_bytes().saturating_mul(6).saturating_add(64 * 1024));
    let cors = cors_layer(&state.config.web.cors_allowed_origins);

    let upload_route = post(handlers::jobs::create_job)
        .layer::<_, Infallible>(DefaultBodyLimit::disable())
        .layer::<_, Infallible>(RequestBodyLimitLayer::new(upload_limit));

    let api = Router::new()
        .route("/jobs", upload_route)
        .route("/jobs/{id}", delete(handlers::jobs::delete_job))
        .route("/jobs/{id}/tree", get(handlers::jobs::get_tree))
        .route("/jobs/{id}/process", post(handlers::processing::process_job))
        .route("/jobs/{id}/repack", post(handlers::processing::repack_job))
        .route(
            "/jobs/{id}/file",
            get(handlers::files::get_file).put(handlers::files::save_file),
        )
        .route("/jobs/{id}/raw", get(handlers::files::get_raw))
        .route("/jobs/{id}/fs/move", post(handlers::fs::move_entry))
        .route("/jobs/{id}/fs/mkdir", post(handlers::fs::make_dir))
        .route("/jobs/{id}/fs", delete(handlers::fs::delete_entry))
        .route("/jobs/{id}/download", get(handlers::download::download));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(json_limit))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware::request_logging_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_accepts_lists() {
        // Construction must not panic for wildcard, explicit or invalid origins
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&["http://localhost:5173".to_string(), "bad\norigin".to_string()]);
    }

    #[test]
    fn test_to_usize_saturates() {
        assert_eq!(to_usize(10), 10);
        assert_eq!(to_usize(u64::MAX), usize::try_from(u64::MAX).unwrap_or(usize::MAX));
    }
}
