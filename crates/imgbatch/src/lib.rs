//! imgbatch: batch product-image pipeline
//!
//! Accepts a CSV of products with image URLs, then in the background fetches
//! each image, recompresses it to JPEG and publishes it, tracking the status
//! of every product record in SQLite.

pub mod config;
pub mod error;
pub mod imaging;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use types::{
    record::{FailureStage, NewProduct, ProductRecord, RecordStatus, UrlFailure},
    response::{ProductStatus, StatusResponse, UploadResponse},
};
