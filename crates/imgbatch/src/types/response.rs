//! API response bodies

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{ProductRecord, RecordStatus, UrlFailure};

/// Response from `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub request_id: Uuid,
    pub products_queued: usize,
}

/// One product in a status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStatus {
    pub product_name: String,
    pub status: RecordStatus,
    pub output_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<UrlFailure>,
}

impl From<ProductRecord> for ProductStatus {
    fn from(record: ProductRecord) -> Self {
        Self {
            product_name: record.product_name,
            status: record.status,
            output_refs: record.output_refs,
            failures: record.failures,
        }
    }
}

/// Response from `GET /status/:request_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub request_id: Uuid,
    pub status: Vec<ProductStatus>,
}
