//! CSV upload endpoint

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};

use crate::error::{Error, Result};
use crate::ingestion::parse_upload;
use crate::server::state::AppState;
use crate::types::UploadResponse;

/// Multipart field expected to carry the CSV
const FILE_FIELD: &str = "file";

/// POST /upload - Accept a product CSV and queue it for processing
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read multipart field", e))?
    {
        let is_file = field.name() == Some(FILE_FIELD) || field.file_name().is_some();
        if !is_file {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(&format!("Failed to read {}", filename), e))?;

        tracing::info!("Received upload: {} ({} bytes)", filename, data.len());
        upload = Some(data);
        break;
    }

    let data = upload.ok_or_else(|| Error::validation("No CSV file provided"))?;
    let products = parse_upload(&data)?;

    let (request_id, products_queued) = state.submit_batch(products).await?;

    Ok(Json(UploadResponse {
        request_id,
        products_queued,
    }))
}

/// A body cut off by the upload limit is 413; anything else is a bad request
fn multipart_error(context: &str, err: MultipartError) -> Error {
    let message = format!("{}: {}", context, err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(message)
    } else {
        Error::validation(message)
    }
}
