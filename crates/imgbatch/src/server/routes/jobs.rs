//! Batch progress endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::{BatchProgress, QueueStats};
use crate::server::state::AppState;
use crate::storage::StoreStats;

/// Progress of one batch
#[derive(Debug, Serialize)]
pub struct JobProgressResponse {
    #[serde(flatten)]
    pub progress: BatchProgress,
    pub percent_complete: f32,
}

impl From<BatchProgress> for JobProgressResponse {
    fn from(progress: BatchProgress) -> Self {
        Self {
            percent_complete: progress.percent_complete(),
            progress,
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobProgressResponse>,
    pub stats: QueueStats,
    pub store: StoreStats,
}

/// GET /jobs/:request_id - Get batch progress
pub async fn get_job_progress(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<JobProgressResponse>> {
    let request_id = Uuid::parse_str(request_id.trim())
        .map_err(|_| Error::validation(format!("'{}' is not a valid request ID", request_id)))?;

    let progress = state
        .job_queue()
        .get_progress(request_id)
        .ok_or_else(|| Error::NotFound(format!("Batch {} not found", request_id)))?;

    Ok(Json(progress.into()))
}

/// GET /jobs - List batches with queue and store statistics
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobListResponse>> {
    let jobs = state
        .job_queue()
        .list_jobs()
        .into_iter()
        .map(JobProgressResponse::from)
        .collect();
    let stats = state.job_queue().stats();
    let store = state.db().run(|db| db.stats()).await?;

    Ok(Json(JobListResponse { jobs, stats, store }))
}
