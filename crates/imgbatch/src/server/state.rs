//! Application state for the image batch server

use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::Result;
use crate::imaging::{ImageFetcher, ImageTransformer};
use crate::processing::{BatchWorker, JobQueue};
use crate::providers::{ArtifactPublisher, LocalArtifactStore};
use crate::storage::ProductDb;
use crate::types::{NewProduct, ProductRecord};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AppConfig,
    /// Durable status store
    db: ProductDb,
    /// Job queue feeding the batch worker
    job_queue: Arc<JobQueue>,
    /// Artifact publisher
    publisher: Arc<dyn ArtifactPublisher>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state from configuration
    pub async fn new(config: AppConfig) -> Result<Self> {
        tracing::info!("Initializing image batch application state...");

        let db_path = config.storage.database_path();
        let db = ProductDb::new(&db_path)?;
        tracing::info!("Status store opened at {}", db_path.display());

        let publisher = LocalArtifactStore::new(
            &config.storage.static_dir,
            &config.storage.public_base_url,
        )?;
        tracing::info!(
            "Artifacts written to {} and served under {}",
            config.storage.static_dir.display(),
            config.storage.public_base_url
        );

        Self::with_parts(config, db, Arc::new(publisher)).await
    }

    /// Create state around an existing store and publisher, then start the worker
    pub async fn with_parts(
        config: AppConfig,
        db: ProductDb,
        publisher: Arc<dyn ArtifactPublisher>,
    ) -> Result<Self> {
        let concurrency = config.processing.effective_concurrency();
        let fetcher = ImageFetcher::new(&config.fetch)?;
        let transformer = ImageTransformer::new(config.image.quality);

        tracing::info!("Artifact publisher: {}", publisher.name());

        let (job_queue, receiver) = JobQueue::new(
            concurrency,
            config.processing.queue_capacity,
            config.processing.progress_retention,
        );
        let job_queue = Arc::new(job_queue);
        tracing::info!(
            "Job queue initialized (capacity {}, {} concurrent records)",
            config.processing.queue_capacity,
            concurrency
        );

        let worker = BatchWorker::new(
            db.clone(),
            fetcher,
            transformer,
            Arc::clone(&publisher),
            Arc::clone(&job_queue),
            concurrency,
            config.processing.url_concurrency,
        );
        tokio::spawn(async move {
            worker.run(receiver).await;
        });

        let resume_pending = config.processing.resume_pending;
        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                job_queue,
                publisher,
                ready: RwLock::new(false),
            }),
        };

        if resume_pending {
            let resumed = state.resume_pending_batches().await?;
            if resumed > 0 {
                tracing::info!("Re-enqueued {} unfinished batches", resumed);
            }
        }

        state.set_ready(true);
        tracing::info!("Application state initialized");
        Ok(state)
    }

    /// Get configuration
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get the status store
    pub fn db(&self) -> &ProductDb {
        &self.inner.db
    }

    /// Get job queue
    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.inner.job_queue
    }

    /// Get the artifact publisher
    pub fn publisher(&self) -> &Arc<dyn ArtifactPublisher> {
        &self.inner.publisher
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }

    /// Persist a batch as PENDING records and hand it to the worker
    pub async fn submit_batch(&self, products: Vec<NewProduct>) -> Result<(Uuid, usize)> {
        let request_id = Uuid::new_v4();
        let records: Vec<ProductRecord> = products
            .into_iter()
            .map(|p| ProductRecord::pending(request_id, p))
            .collect();
        let count = records.len();

        self.db().run(move |db| db.insert_batch(&records)).await?;
        self.job_queue().submit(request_id, count).await?;

        tracing::info!("Batch {} accepted with {} products", request_id, count);
        Ok((request_id, count))
    }

    /// Every record of a batch; empty for an unknown request ID
    pub async fn batch_records(&self, request_id: Uuid) -> Result<Vec<ProductRecord>> {
        self.db()
            .run(move |db| db.list_by_request(request_id))
            .await
    }

    /// Re-enqueue every batch that still has PENDING records
    pub async fn resume_pending_batches(&self) -> Result<usize> {
        let request_ids = self.db().run(|db| db.pending_request_ids()).await?;

        for request_id in &request_ids {
            let request_id = *request_id;
            let summary = self
                .db()
                .run(move |db| db.batch_summary(request_id))
                .await?;
            self.job_queue()
                .resume(request_id, summary.total, summary.completed)
                .await?;
        }

        Ok(request_ids.len())
    }
}
