//! Artifact publisher trait for storing recompressed images

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::imaging::EncodedImage;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to write artifact '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact name '{0}'")]
    InvalidName(String),
}

/// A stored artifact and the reference readers resolve it by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    /// Identifier the storage name was derived from
    pub id: Uuid,
    /// Storage name (`{id}.{ext}`)
    pub name: String,
    /// Public reference; always built from `name`
    pub reference: String,
    /// Size in bytes
    pub size: u64,
}

/// Trait for artifact storage
///
/// Implementations:
/// - `LocalArtifactStore`: Local filesystem served under `/static`
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Persist an image under a fresh unique name
    async fn publish(&self, image: &EncodedImage) -> Result<PublishedArtifact, PublishError>;

    /// Read back the bytes stored under `name`
    async fn resolve(&self, name: &str) -> Result<Vec<u8>, PublishError>;

    /// Check if the provider is usable
    async fn health_check(&self) -> bool;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
