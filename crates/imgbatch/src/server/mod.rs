//! HTTP server for the image batch pipeline

pub mod routes;
pub mod state;

use axum::{routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Image batch HTTP server
pub struct ImageBatchServer {
    config: AppConfig,
    state: AppState,
}

impl ImageBatchServer {
    /// Create a new server, opening the store and starting the worker
    pub async fn new(config: AppConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Create with default configuration
    pub async fn default() -> Result<Self> {
        Self::new(AppConfig::default()).await
    }

    /// Shared state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = build_router(self.state.clone());

        tracing::info!("Starting image batch server on http://{}", addr);
        tracing::info!("Upload endpoint: http://{}/upload", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    let config = state.config();

    let router = Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .merge(routes::api_routes(config.server.max_upload_size))
        .nest_service("/static", ServeDir::new(&config.storage.static_dir))
        .with_state(state.clone());

    // Middleware layers (order matters - applied bottom to top)
    let router = router
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    if config.server.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Welcome endpoint
async fn welcome() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the Image Processing API!" }))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(state: axum::extract::State<AppState>) -> axum::http::StatusCode {
    if state.is_ready() && state.publisher().health_check().await {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}
