//! Configuration for the image batch service

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "IMGBATCH_CONFIG";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Status store and artifact storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Outbound image fetching
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Output image encoding
    #[serde(default)]
    pub image: ImageConfig,
    /// Background processing
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 10MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Status store connection string (SQLite path, `sqlite://` prefix allowed)
    pub database_url: String,
    /// Directory published artifacts are written to and served from
    pub static_dir: PathBuf,
    /// Base URL under which `static_dir` is publicly reachable
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "imgbatch.db".to_string(),
            static_dir: PathBuf::from("static"),
            public_base_url: "http://localhost:8000/static".to_string(),
        }
    }
}

impl StorageConfig {
    /// Filesystem path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        let raw = self.database_url.trim();
        let path = raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
            .unwrap_or(raw);
        PathBuf::from(path)
    }
}

/// Outbound fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Largest accepted response body
    pub max_image_bytes: usize,
    /// User-Agent header sent with every fetch
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_image_bytes: 20 * 1024 * 1024, // 20MB
            user_agent: concat!("imgbatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Output image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// JPEG quality on a 1-100 scale
    pub quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { quality: 50 }
    }
}

/// Background processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Records processed concurrently across all batches (default: CPU count, max 8)
    pub concurrency_limit: Option<usize>,
    /// Image URLs of one record fetched concurrently
    pub url_concurrency: usize,
    /// Batches that may wait in the job queue
    pub queue_capacity: usize,
    /// Re-enqueue batches that still have pending records at startup
    pub resume_pending: bool,
    /// Completed batches whose progress stays visible under `/jobs`
    pub progress_retention: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None, // Auto-detect from CPU count
            url_concurrency: 4,
            queue_capacity: 1000,
            resume_pending: true,
            progress_retention: 200,
        }
    }
}

impl ProcessingConfig {
    /// Effective record concurrency
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_limit
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the optional TOML file, then environment overrides
    pub fn load() -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();

        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = env_string("IMGBATCH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("IMGBATCH_PORT")? {
            self.server.port = port;
        }
        if let Some(size) = env_parse("IMGBATCH_MAX_UPLOAD_SIZE")? {
            self.server.max_upload_size = size;
        }

        if let Some(url) = env_string("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(dir) = env_string("IMGBATCH_STATIC_DIR") {
            self.storage.static_dir = PathBuf::from(dir);
        }
        if let Some(base) = env_string("IMGBATCH_PUBLIC_BASE_URL") {
            self.storage.public_base_url = base;
        }

        if let Some(secs) = env_parse("IMGBATCH_FETCH_TIMEOUT_SECS")? {
            self.fetch.timeout_secs = secs;
        }
        if let Some(bytes) = env_parse("IMGBATCH_MAX_IMAGE_BYTES")? {
            self.fetch.max_image_bytes = bytes;
        }
        if let Some(agent) = env_string("IMGBATCH_USER_AGENT") {
            self.fetch.user_agent = agent;
        }

        if let Some(quality) = env_parse("IMGBATCH_IMAGE_QUALITY")? {
            self.image.quality = quality;
        }

        if let Some(limit) = env_parse("IMGBATCH_CONCURRENCY_LIMIT")? {
            self.processing.concurrency_limit = Some(limit);
        }
        if let Some(n) = env_parse("IMGBATCH_URL_CONCURRENCY")? {
            self.processing.url_concurrency = n;
        }
        if let Some(capacity) = env_parse("IMGBATCH_QUEUE_CAPACITY")? {
            self.processing.queue_capacity = capacity;
        }
        if let Some(resume) = env_parse("IMGBATCH_RESUME_PENDING")? {
            self.processing.resume_pending = resume;
        }
        if let Some(retention) = env_parse("IMGBATCH_PROGRESS_RETENTION")? {
            self.processing.progress_retention = retention;
        }

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.image.quality) {
            return Err(Error::Config(format!(
                "image.quality must be within 1-100, got {}",
                self.image.quality
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(Error::Config("fetch.timeout_secs must be positive".to_string()));
        }
        if self.processing.concurrency_limit == Some(0) {
            return Err(Error::Config(
                "processing.concurrency_limit must be positive".to_string(),
            ));
        }
        if self.processing.url_concurrency == 0 {
            return Err(Error::Config(
                "processing.url_concurrency must be positive".to_string(),
            ));
        }
        if self.processing.queue_capacity == 0 {
            return Err(Error::Config(
                "processing.queue_capacity must be positive".to_string(),
            ));
        }
        if self.storage.public_base_url.trim().is_empty() {
            return Err(Error::Config("storage.public_base_url is empty".to_string()));
        }
        if self.storage.database_path().as_os_str().is_empty() {
            return Err(Error::Config("storage.database_url is empty".to_string()));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(None),
    }
}
