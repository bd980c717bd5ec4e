//! Batch status endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{ProductStatus, StatusResponse};

/// GET /status/:request_id - Current state of every record in a batch
pub async fn get_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let request_id = Uuid::parse_str(request_id.trim())
        .map_err(|_| Error::validation(format!("'{}' is not a valid request ID", request_id)))?;

    let records = state.batch_records(request_id).await?;

    Ok(Json(StatusResponse {
        request_id,
        status: records.into_iter().map(ProductStatus::from).collect(),
    }))
}
