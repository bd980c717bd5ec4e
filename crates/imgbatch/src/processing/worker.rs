//! Background worker for processing batches

use futures_util::future::{join_all, FutureExt};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::imaging::{ImageFetcher, ImageTransformer};
use crate::providers::ArtifactPublisher;
use crate::storage::ProductDb;
use crate::types::{FailureStage, ProductRecord, UrlFailure};

use super::job_queue::{BatchJob, JobQueue};

/// What one pass over a batch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub records_completed: usize,
    pub records_failed: usize,
    pub images_published: usize,
    pub images_failed: usize,
}

/// What processing one record did
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record_id: Uuid,
    pub output_refs: Vec<String>,
    pub failures: Vec<UrlFailure>,
    /// False when the record had already been completed by someone else
    pub written: bool,
}

/// Worker that fetches, recompresses and publishes the images of each batch
#[derive(Clone)]
pub struct BatchWorker {
    db: ProductDb,
    fetcher: ImageFetcher,
    transformer: ImageTransformer,
    publisher: Arc<dyn ArtifactPublisher>,
    job_queue: Arc<JobQueue>,
    /// Shared across batches, bounds records in flight
    record_permits: Arc<Semaphore>,
    url_concurrency: usize,
}

impl BatchWorker {
    /// Create a new batch worker
    pub fn new(
        db: ProductDb,
        fetcher: ImageFetcher,
        transformer: ImageTransformer,
        publisher: Arc<dyn ArtifactPublisher>,
        job_queue: Arc<JobQueue>,
        concurrency_limit: usize,
        url_concurrency: usize,
    ) -> Self {
        tracing::info!(
            "Worker configured: {} concurrent records, {} concurrent URLs per record, JPEG quality {}",
            concurrency_limit,
            url_concurrency,
            transformer.quality()
        );

        Self {
            db,
            fetcher,
            transformer,
            publisher,
            job_queue,
            record_permits: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            url_concurrency: url_concurrency.max(1),
        }
    }

    /// Start processing batches from the queue.
    ///
    /// Each batch runs as its own task in a `JoinSet`. A batch that panics is
    /// logged and marked complete so it stops counting toward the queue size.
    /// Returns once every sender is dropped and the running batches finish.
    pub async fn run(self, mut receiver: mpsc::Receiver<BatchJob>) {
        tracing::info!("Batch worker started");

        let mut batches = JoinSet::new();
        loop {
            tokio::select! {
                job = receiver.recv() => match job {
                    Some(job) => {
                        let worker = self.clone();
                        batches.spawn(worker.supervise(job.request_id));
                    }
                    None => break,
                },
                Some(joined) = batches.join_next() => self.reap(joined),
            }
        }

        while let Some(joined) = batches.join_next().await {
            self.reap(joined);
        }

        tracing::info!("Batch worker stopped: job queue closed");
    }

    /// Run one batch, turning a panic into an error tied to its request ID
    async fn supervise(self, request_id: Uuid) -> (Uuid, Result<BatchOutcome>) {
        let result = AssertUnwindSafe(self.process_batch(request_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::internal(panic_message(&*panic))));
        (request_id, result)
    }

    fn reap(
        &self,
        joined: std::result::Result<(Uuid, Result<BatchOutcome>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((request_id, Ok(outcome))) => tracing::info!(
                "Batch {} done: {} records completed, {} failed to write, {} images published, {} images dropped",
                request_id,
                outcome.records_completed,
                outcome.records_failed,
                outcome.images_published,
                outcome.images_failed
            ),
            Ok((request_id, Err(e))) => {
                self.job_queue.mark_complete(request_id);
                tracing::error!("Batch {} could not be processed: {}", request_id, e);
            }
            Err(e) => tracing::error!("Batch task failed to join: {}", e),
        }
    }

    /// Process every PENDING record of a batch
    pub async fn process_batch(&self, request_id: Uuid) -> Result<BatchOutcome> {
        self.job_queue.mark_processing(request_id);

        let pending = match self
            .db
            .run(move |db| db.list_pending_by_request(request_id))
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                self.job_queue.mark_complete(request_id);
                return Err(e);
            }
        };

        tracing::info!(
            "Processing batch {} with {} pending records",
            request_id,
            pending.len()
        );

        let record_futures = pending.into_iter().map(|record| async move {
            let product_name = record.product_name.clone();
            let _permit = self
                .record_permits
                .acquire()
                .await
                .map_err(|_| Error::internal("record semaphore closed"))?;

            self.job_queue
                .update_current_product(request_id, &product_name);
            self.process_record(record).await
        });

        let results = join_all(record_futures).await;

        let mut outcome = BatchOutcome::default();
        for result in results {
            match result {
                Ok(record) if record.written => {
                    outcome.records_completed += 1;
                    outcome.images_published += record.output_refs.len();
                    outcome.images_failed += record.failures.len();
                }
                Ok(_) => {}
                Err(e) => {
                    outcome.records_failed += 1;
                    self.job_queue.record_failed(request_id);
                    tracing::error!("Record in batch {} left pending: {}", request_id, e);
                }
            }
        }

        self.job_queue.mark_complete(request_id);
        Ok(outcome)
    }

    /// Run every URL of one record, then write its outcome in one update
    pub async fn process_record(&self, record: ProductRecord) -> Result<RecordOutcome> {
        let ProductRecord {
            id: record_id,
            request_id,
            product_name,
            input_urls,
            ..
        } = record;

        let results: Vec<std::result::Result<String, UrlFailure>> = stream::iter(input_urls)
            .map(|url| self.process_url(url))
            .buffered(self.url_concurrency)
            .collect()
            .await;

        let mut output_refs = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(reference) => output_refs.push(reference),
                Err(failure) => failures.push(failure),
            }
        }

        let (refs, fails) = (output_refs.clone(), failures.clone());
        let written = self
            .db
            .run(move |db| db.complete_record(record_id, &refs, &fails))
            .await?;

        if written {
            self.job_queue
                .record_completed(request_id, &product_name, output_refs.len(), &failures);
            tracing::info!(
                "Completed '{}': {} images published, {} dropped",
                product_name,
                output_refs.len(),
                failures.len()
            );
        } else {
            tracing::debug!("Record {} was already complete", record_id);
        }

        Ok(RecordOutcome {
            record_id,
            output_refs,
            failures,
            written,
        })
    }

    /// Fetch, recompress and publish one image
    async fn process_url(&self, url: String) -> std::result::Result<String, UrlFailure> {
        let fetched = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| url_failure(&url, FailureStage::Fetch, &e))?;

        let transformer = self.transformer;
        let encoded = tokio::task::spawn_blocking(move || transformer.transform(&fetched.image))
            .await
            .map_err(|e| url_failure(&url, FailureStage::Transform, &e))?
            .map_err(|e| url_failure(&url, FailureStage::Transform, &e))?;

        let artifact = self
            .publisher
            .publish(&encoded)
            .await
            .map_err(|e| url_failure(&url, FailureStage::Publish, &e))?;

        tracing::debug!("Published {} as {}", url, artifact.reference);
        Ok(artifact.reference)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("batch task panicked: {}", detail)
}

fn url_failure(url: &str, stage: FailureStage, err: &dyn std::fmt::Display) -> UrlFailure {
    tracing::warn!("Dropping image {} at {:?} stage: {}", url, stage, err);
    UrlFailure {
        url: url.to_string(),
        stage,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::providers::LocalArtifactStore;
    use crate::types::{NewProduct, RecordStatus};

    fn worker(
        db: &ProductDb,
        static_dir: &std::path::Path,
    ) -> (BatchWorker, Arc<JobQueue>, mpsc::Receiver<BatchJob>) {
        let (queue, receiver) = JobQueue::new(2, 8, 16);
        let queue = Arc::new(queue);
        let publisher = Arc::new(
            LocalArtifactStore::new(static_dir, "http://localhost:8000/static").unwrap(),
        );
        let worker = BatchWorker::new(
            db.clone(),
            ImageFetcher::new(&FetchConfig::default()).unwrap(),
            ImageTransformer::default(),
            publisher,
            queue.clone(),
            2,
            2,
        );
        (worker, queue, receiver)
    }

    fn insert(db: &ProductDb, request_id: Uuid, name: &str, urls: &[&str]) -> ProductRecord {
        let record = ProductRecord::pending(
            request_id,
            NewProduct {
                product_name: name.to_string(),
                input_urls: urls.iter().map(|u| u.to_string()).collect(),
            },
        );
        db.insert_batch(std::slice::from_ref(&record)).unwrap();
        record
    }

    #[tokio::test]
    async fn test_record_with_only_bad_urls_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let db = ProductDb::in_memory().unwrap();
        let (worker, _queue, _receiver) = worker(&db, dir.path());
        let request_id = Uuid::new_v4();
        let record = insert(&db, request_id, "SKU1", &["not a url", "ftp://a.example/x.jpg"]);

        let outcome = worker.process_batch(request_id).await.unwrap();
        assert_eq!(outcome.records_completed, 1);
        assert_eq!(outcome.images_failed, 2);

        let stored = db.get_record(record.id).unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Completed);
        assert!(stored.output_refs.is_empty());
        assert_eq!(stored.failures.len(), 2);
        assert!(stored.failures.iter().all(|f| f.stage == FailureStage::Fetch));
        assert_eq!(stored.failures[0].url, "not a url");
    }

    #[tokio::test]
    async fn test_completed_records_are_not_reprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let db = ProductDb::in_memory().unwrap();
        let (worker, _queue, _receiver) = worker(&db, dir.path());
        let request_id = Uuid::new_v4();
        let record = insert(&db, request_id, "SKU1", &["not a url"]);
        db.complete_record(record.id, &["http://cdn/kept.jpg".to_string()], &[])
            .unwrap();

        let outcome = worker.process_batch(request_id).await.unwrap();
        assert_eq!(outcome, BatchOutcome::default());

        let stored = db.get_record(record.id).unwrap().unwrap();
        assert_eq!(stored.output_refs, vec!["http://cdn/kept.jpg"]);
    }

    #[tokio::test]
    async fn test_second_write_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db = ProductDb::in_memory().unwrap();
        let (worker, _queue, _receiver) = worker(&db, dir.path());
        let record = insert(&db, Uuid::new_v4(), "SKU1", &["not a url"]);

        let first = worker.process_record(record.clone()).await.unwrap();
        let second = worker.process_record(record).await.unwrap();
        assert!(first.written);
        assert!(!second.written);
    }

    #[tokio::test]
    async fn test_batch_progress_is_updated() {
        let dir = tempfile::tempdir().unwrap();
        let db = ProductDb::in_memory().unwrap();
        let (worker, queue, _receiver) = worker(&db, dir.path());
        let request_id = Uuid::new_v4();
        insert(&db, request_id, "A", &["not a url"]);
        insert(&db, request_id, "B", &["also not a url"]);
        queue.submit(request_id, 2).await.unwrap();

        worker.process_batch(request_id).await.unwrap();

        let progress = queue.get_progress(request_id).unwrap();
        assert_eq!(progress.status, crate::processing::BatchStatus::Complete);
        assert_eq!(progress.records_completed, 2);
        assert_eq!(progress.images_failed, 2);
        assert_eq!(progress.image_errors.len(), 2);
    }

    #[test]
    fn test_panic_message_keeps_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "batch task panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "batch task panicked: bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "batch task panicked: unknown cause");
    }
}
