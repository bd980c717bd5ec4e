//! API routes for the image batch server

pub mod jobs;
pub mod status;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // CSV upload - with body limit for the multipart form
        .route(
            "/upload",
            post(upload::upload_csv).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/upload/",
            post(upload::upload_csv).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Per-batch record status
        .route("/status/:request_id", get(status::get_status))
        // In-memory batch progress
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:request_id", get(jobs::get_job_progress))
}
