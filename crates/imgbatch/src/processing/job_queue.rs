//! Job queue for background batch processing
//!
//! Batches are durable in the status store; this queue only carries request
//! IDs to the worker and keeps in-memory progress for the `/jobs` endpoints.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{FailureStage, UrlFailure};

/// Batch status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Complete,
}

/// A dropped image URL, attributed to its product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageError {
    pub product_name: String,
    pub url: String,
    pub stage: FailureStage,
    pub error: String,
}

/// Progress information for a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub request_id: Uuid,
    pub status: BatchStatus,
    pub total_records: usize,
    pub records_completed: usize,
    /// Records whose completion write failed; they stay PENDING in the store
    pub records_failed: usize,
    pub images_published: usize,
    pub images_failed: usize,
    pub current_product: Option<String>,
    pub image_errors: Vec<ImageError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn new(request_id: Uuid, total_records: usize) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            status: BatchStatus::Queued,
            total_records,
            records_completed: 0,
            records_failed: 0,
            images_published: 0,
            images_failed: 0,
            current_product: None,
            image_errors: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn percent_complete(&self) -> f32 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.records_completed + self.records_failed) as f32 / self.total_records as f32 * 100.0
    }
}

/// A batch waiting for the worker
#[derive(Debug, Clone, Copy)]
pub struct BatchJob {
    pub request_id: Uuid,
}

/// Job queue for managing background processing
pub struct JobQueue {
    /// Known batches with progress
    batches: Arc<DashMap<Uuid, BatchProgress>>,
    /// Channel for sending batches to the worker
    sender: mpsc::Sender<BatchJob>,
    /// Records processed concurrently
    concurrency: usize,
    /// Batches queued or processing
    queue_size: Arc<AtomicUsize>,
    /// Completed batches kept for `/jobs`; older ones are evicted
    retention: usize,
}

impl JobQueue {
    /// Create a new job queue and the receiver the worker drains
    pub fn new(
        concurrency: usize,
        capacity: usize,
        retention: usize,
    ) -> (Self, mpsc::Receiver<BatchJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let queue = Self {
            batches: Arc::new(DashMap::new()),
            sender,
            concurrency,
            queue_size: Arc::new(AtomicUsize::new(0)),
            retention,
        };

        (queue, receiver)
    }

    /// Submit a persisted batch for processing
    pub async fn submit(&self, request_id: Uuid, total_records: usize) -> Result<()> {
        self.enqueue(BatchProgress::new(request_id, total_records))
            .await
    }

    /// Re-enqueue a batch that still has pending records after a restart
    pub async fn resume(
        &self,
        request_id: Uuid,
        total_records: usize,
        records_completed: usize,
    ) -> Result<()> {
        let mut progress = BatchProgress::new(request_id, total_records);
        progress.records_completed = records_completed;

        tracing::info!(
            "Resuming batch {} ({} of {} records already complete)",
            request_id,
            records_completed,
            total_records
        );
        self.enqueue(progress).await
    }

    async fn enqueue(&self, progress: BatchProgress) -> Result<()> {
        let request_id = progress.request_id;
        self.batches.insert(request_id, progress);
        self.queue_size.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.sender.send(BatchJob { request_id }).await {
            tracing::error!("Failed to enqueue batch {}: {}", request_id, e);
            self.batches.remove(&request_id);
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::internal("Background worker is not running"));
        }

        Ok(())
    }

    /// Get batch progress
    pub fn get_progress(&self, request_id: Uuid) -> Option<BatchProgress> {
        self.batches.get(&request_id).map(|p| p.clone())
    }

    /// All known batches, newest first
    pub fn list_jobs(&self) -> Vec<BatchProgress> {
        let mut jobs: Vec<BatchProgress> =
            self.batches.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Mark a batch as picked up by the worker
    pub fn mark_processing(&self, request_id: Uuid) {
        if let Some(mut progress) = self.batches.get_mut(&request_id) {
            progress.status = BatchStatus::Processing;
            progress.updated_at = Utc::now();
        }
    }

    /// Update the product currently being processed
    pub fn update_current_product(&self, request_id: Uuid, product_name: &str) {
        if let Some(mut progress) = self.batches.get_mut(&request_id) {
            progress.current_product = Some(product_name.to_string());
            progress.updated_at = Utc::now();
        }
    }

    /// Count a record whose outcome was written
    pub fn record_completed(
        &self,
        request_id: Uuid,
        product_name: &str,
        published: usize,
        failures: &[UrlFailure],
    ) {
        if let Some(mut progress) = self.batches.get_mut(&request_id) {
            progress.records_completed += 1;
            progress.images_published += published;
            progress.images_failed += failures.len();
            progress.image_errors.extend(failures.iter().map(|f| ImageError {
                product_name: product_name.to_string(),
                url: f.url.clone(),
                stage: f.stage,
                error: f.message.clone(),
            }));
            progress.updated_at = Utc::now();
        }
    }

    /// Count a record whose completion write failed
    pub fn record_failed(&self, request_id: Uuid) {
        if let Some(mut progress) = self.batches.get_mut(&request_id) {
            progress.records_failed += 1;
            progress.updated_at = Utc::now();
        }
    }

    /// Mark a batch as done with this pass
    pub fn mark_complete(&self, request_id: Uuid) {
        if let Some(mut progress) = self.batches.get_mut(&request_id) {
            if progress.status == BatchStatus::Complete {
                return;
            }
            let now = Utc::now();
            progress.status = BatchStatus::Complete;
            progress.current_product = None;
            progress.updated_at = now;
            progress.completed_at = Some(now);
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
            drop(progress); // Release the shard lock before evicting
            self.evict_completed();
        }
    }

    /// Drop the oldest completed batches beyond the retention limit
    fn evict_completed(&self) {
        let mut completed: Vec<(DateTime<Utc>, Uuid)> = self
            .batches
            .iter()
            .filter_map(|b| b.completed_at.map(|at| (at, b.request_id)))
            .collect();
        if completed.len() <= self.retention {
            return;
        }

        completed.sort();
        let excess = completed.len() - self.retention;
        for (_, request_id) in completed.into_iter().take(excess) {
            self.batches
                .remove_if(&request_id, |_, p| p.status == BatchStatus::Complete);
        }
        tracing::debug!("Evicted {} completed batches from progress tracking", excess);
    }

    /// Batches queued or processing
    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let total = self.batches.len();
        let queued = self
            .batches
            .iter()
            .filter(|b| b.status == BatchStatus::Queued)
            .count();
        let processing = self
            .batches
            .iter()
            .filter(|b| b.status == BatchStatus::Processing)
            .count();
        let complete = self
            .batches
            .iter()
            .filter(|b| b.status == BatchStatus::Complete)
            .count();

        QueueStats {
            total_batches: total,
            queued,
            processing,
            complete,
            concurrency: self.concurrency,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_batches: usize,
    pub queued: usize,
    pub processing: usize,
    pub complete: usize,
    pub concurrency: usize,
}
