//! Core types for the image batch pipeline

pub mod record;
pub mod response;

pub use record::{FailureStage, NewProduct, ProductRecord, RecordStatus, UrlFailure};
pub use response::{ProductStatus, StatusResponse, UploadResponse};
