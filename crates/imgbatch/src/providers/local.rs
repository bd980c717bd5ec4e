//! Local filesystem artifact store

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::imaging::EncodedImage;

use super::artifact_store::{ArtifactPublisher, PublishError, PublishedArtifact};

/// Writes artifacts into a directory that is served as static files
pub struct LocalArtifactStore {
    /// Directory to store artifacts
    static_dir: PathBuf,
    /// Public URL prefix of `static_dir`, without trailing slash
    public_base_url: String,
}

impl LocalArtifactStore {
    /// Create the store, creating the directory if needed
    pub fn new(static_dir: impl Into<PathBuf>, public_base_url: &str) -> crate::error::Result<Self> {
        let static_dir = static_dir.into();
        std::fs::create_dir_all(&static_dir)?;
        Ok(Self {
            static_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// Public reference for a storage name
    pub fn reference_for(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url, name)
    }

    /// Storage name of a reference produced by this store
    pub fn name_from_reference<'a>(&self, reference: &'a str) -> Option<&'a str> {
        reference
            .strip_prefix(self.public_base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| is_valid_name(name))
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.static_dir.join(name)
    }
}

/// A bare file name, no separators or dot-files
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().map_or(false, |f| f == name)
}

#[async_trait]
impl ArtifactPublisher for LocalArtifactStore {
    async fn publish(&self, image: &EncodedImage) -> Result<PublishedArtifact, PublishError> {
        // The one identifier names both the file and the reference
        let id = Uuid::new_v4();
        let name = format!("{}.{}", id, image.extension());
        let final_path = self.artifact_path(&name);
        let tmp_path = self.artifact_path(&format!(".{}.tmp", name));

        let write_err = |source| PublishError::Write {
            name: name.clone(),
            source,
        };

        tokio::fs::write(&tmp_path, &image.bytes)
            .await
            .map_err(write_err)?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(source));
        }

        Ok(PublishedArtifact {
            id,
            reference: self.reference_for(&name),
            size: image.bytes.len() as u64,
            name,
        })
    }

    async fn resolve(&self, name: &str) -> Result<Vec<u8>, PublishError> {
        if !is_valid_name(name) {
            return Err(PublishError::InvalidName(name.to_string()));
        }
        tokio::fs::read(self.artifact_path(name))
            .await
            .map_err(|source| PublishError::Read {
                name: name.to_string(),
                source,
            })
    }

    async fn health_check(&self) -> bool {
        tokio::fs::metadata(&self.static_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}
