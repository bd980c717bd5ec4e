//! Artifact storage providers
//!
//! The publisher trait allows swapping the filesystem store for other backends.

pub mod artifact_store;
pub mod local;

pub use artifact_store::{ArtifactPublisher, PublishError, PublishedArtifact};
pub use local::LocalArtifactStore;
