//! Product record types tracked by the status store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a product record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Waiting for the background worker
    Pending,
    /// Every input URL has been attempted; terminal
    Completed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RecordStatus::Pending),
            "COMPLETED" => Some(RecordStatus::Completed),
            _ => None,
        }
    }
}

/// Pipeline stage at which an image URL was dropped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Transform,
    Publish,
}

/// An input URL that produced no artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlFailure {
    pub url: String,
    pub stage: FailureStage,
    pub message: String,
}

/// A product row parsed from an upload, before it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub product_name: String,
    pub input_urls: Vec<String>,
}

/// A persisted product record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Display label
    pub product_name: String,
    /// Source image URLs in upload order
    pub input_urls: Vec<String>,
    /// Published artifact references, in attempt order of successful URLs
    pub output_refs: Vec<String>,
    /// URLs that were skipped, with the reason
    pub failures: Vec<UrlFailure>,
    /// Batch this record belongs to
    pub request_id: Uuid,
    /// Processing status
    pub status: RecordStatus,
    /// When the batch was submitted
    pub created_at: DateTime<Utc>,
    /// When the record reached COMPLETED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// Create a pending record for a batch
    pub fn pending(request_id: Uuid, product: NewProduct) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_name: product.product_name,
            input_urls: product.input_urls,
            output_refs: Vec::new(),
            failures: Vec::new(),
            request_id,
            status: RecordStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RecordStatus::Completed
    }
}
