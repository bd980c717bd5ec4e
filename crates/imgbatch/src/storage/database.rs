//! SQLite status store for product records
//!
//! One `products` table keyed by record id with a secondary index on
//! `request_id`. The connection sits behind a mutex so concurrent batches can
//! write safely; blocking calls go through [`ProductDb::run`] from async code.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ProductRecord, RecordStatus, UrlFailure};

const RECORD_COLUMNS: &str = "id, request_id, product_name, input_urls, output_refs, failures, \
                              status, created_at, completed_at";

/// SQLite-based product status store
#[derive(Clone)]
pub struct ProductDb {
    conn: Arc<Mutex<Connection>>,
}

/// Record counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
}

impl BatchSummary {
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.pending == 0
    }
}

/// Store-wide record counts
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub batches: usize,
    pub records: usize,
    pub pending: usize,
    pub completed: usize,
}

impl ProductDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::store(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(true)?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::store(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(false)?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self, on_disk: bool) -> Result<()> {
        let conn = self.conn.lock();

        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA temp_store=MEMORY;
                "#,
            )
            .map_err(|e| Error::store(format!("Failed to set pragmas: {}", e)))?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                product_name TEXT NOT NULL,
                input_urls TEXT NOT NULL,
                output_refs TEXT NOT NULL DEFAULT '[]',
                failures TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_products_request_id ON products(request_id);
            CREATE INDEX IF NOT EXISTS idx_products_status ON products(status);
            "#,
        )
        .map_err(|e| Error::store(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Run a blocking store call on the blocking pool
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ProductDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // ==================== Writes ====================

    /// Insert every record of a batch in one transaction
    pub fn insert_batch(&self, records: &[ProductRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::store(format!("Failed to begin transaction: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO products (
                        id, request_id, position, product_name, input_urls,
                        output_refs, failures, status, created_at, completed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .map_err(|e| Error::store(format!("Failed to prepare insert: {}", e)))?;

            for (position, record) in records.iter().enumerate() {
                stmt.execute(params![
                    record.id.to_string(),
                    record.request_id.to_string(),
                    position as i64,
                    record.product_name,
                    serde_json::to_string(&record.input_urls)?,
                    serde_json::to_string(&record.output_refs)?,
                    serde_json::to_string(&record.failures)?,
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.completed_at.map(|t| t.to_rfc3339()),
                ])
                .map_err(|e| Error::store(format!("Failed to insert record: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::store(format!("Failed to commit batch: {}", e)))?;
        Ok(())
    }

    /// Write the outcome of a record.
    ///
    /// Only a PENDING row is updated, so a COMPLETED record is never changed again.
    /// Returns whether the row was updated.
    pub fn update_outcome(
        &self,
        record_id: Uuid,
        output_refs: &[String],
        failures: &[UrlFailure],
        status: RecordStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock();

        let completed_at = match status {
            RecordStatus::Completed => Some(Utc::now().to_rfc3339()),
            RecordStatus::Pending => None,
        };

        let updated = conn
            .execute(
                r#"
                UPDATE products SET
                    output_refs = ?2,
                    failures = ?3,
                    status = ?4,
                    completed_at = ?5
                WHERE id = ?1 AND status = 'PENDING'
                "#,
                params![
                    record_id.to_string(),
                    serde_json::to_string(output_refs)?,
                    serde_json::to_string(failures)?,
                    status.as_str(),
                    completed_at,
                ],
            )
            .map_err(|e| Error::store(format!("Failed to update record {}: {}", record_id, e)))?;

        Ok(updated == 1)
    }

    /// Mark a record COMPLETED with its outputs
    pub fn complete_record(
        &self,
        record_id: Uuid,
        output_refs: &[String],
        failures: &[UrlFailure],
    ) -> Result<bool> {
        self.update_outcome(record_id, output_refs, failures, RecordStatus::Completed)
    }

    // ==================== Reads ====================

    /// All records of a batch, in upload order
    pub fn list_by_request(&self, request_id: Uuid) -> Result<Vec<ProductRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM products WHERE request_id = ?1 ORDER BY position ASC",
                RECORD_COLUMNS
            ),
            request_id,
        )
    }

    /// Records of a batch that still need processing
    pub fn list_pending_by_request(&self, request_id: Uuid) -> Result<Vec<ProductRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM products WHERE request_id = ?1 AND status = 'PENDING' \
                 ORDER BY position ASC",
                RECORD_COLUMNS
            ),
            request_id,
        )
    }

    fn query_records(&self, sql: &str, request_id: Uuid) -> Result<Vec<ProductRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::store(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params![request_id.to_string()], row_to_record)
            .map_err(|e| Error::store(format!("Failed to list records: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::store(format!("Failed to read record: {}", e)))?;

        Ok(records)
    }

    /// Get a record by ID
    pub fn get_record(&self, record_id: Uuid) -> Result<Option<ProductRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM products WHERE id = ?1", RECORD_COLUMNS))
            .map_err(|e| Error::store(format!("Failed to prepare query: {}", e)))?;

        let record = stmt
            .query_row(params![record_id.to_string()], row_to_record)
            .optional()
            .map_err(|e| Error::store(format!("Failed to get record: {}", e)))?;

        Ok(record)
    }

    /// Batches that still have PENDING records, oldest first
    pub fn pending_request_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT request_id FROM products WHERE status = 'PENDING' \
                 GROUP BY request_id ORDER BY MIN(created_at) ASC",
            )
            .map_err(|e| Error::store(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map([], |row| parse_uuid_column(0, &row.get::<_, String>(0)?))
            .map_err(|e| Error::store(format!("Failed to list pending batches: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::store(format!("Failed to read pending batch: {}", e)))?;

        Ok(ids)
    }

    /// Record counts for a batch
    pub fn batch_summary(&self, request_id: Uuid) -> Result<BatchSummary> {
        let conn = self.conn.lock();

        let (total, pending): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'PENDING'), 0) \
                 FROM products WHERE request_id = ?1",
                params![request_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::store(format!("Failed to summarize batch: {}", e)))?;

        Ok(BatchSummary {
            total: total as usize,
            pending: pending as usize,
            completed: (total - pending) as usize,
        })
    }

    /// Store-wide counts
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let (batches, records, pending): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(DISTINCT request_id), COUNT(*), COALESCE(SUM(status = 'PENDING'), 0) \
                 FROM products",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| Error::store(format!("Failed to get stats: {}", e)))?;

        Ok(StoreStats {
            batches: batches as usize,
            records: records as usize,
            pending: pending as usize,
            completed: (records - pending) as usize,
        })
    }
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_uuid_column(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_time_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_status_column(idx: usize, raw: &str) -> rusqlite::Result<RecordStatus> {
    RecordStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown record status '{}'", raw).into(),
        )
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ProductRecord> {
    let id_str: String = row.get(0)?;
    let request_id_str: String = row.get(1)?;
    let product_name: String = row.get(2)?;
    let input_urls_json: String = row.get(3)?;
    let output_refs_json: String = row.get(4)?;
    let failures_json: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    let completed_at_str: Option<String> = row.get(8)?;

    Ok(ProductRecord {
        id: parse_uuid_column(0, &id_str)?,
        request_id: parse_uuid_column(1, &request_id_str)?,
        product_name,
        input_urls: parse_json_column(3, &input_urls_json)?,
        output_refs: parse_json_column(4, &output_refs_json)?,
        failures: parse_json_column(5, &failures_json)?,
        status: parse_status_column(6, &status_str)?,
        created_at: parse_time_column(7, &created_at_str)?,
        completed_at: completed_at_str
            .map(|s| parse_time_column(8, &s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureStage, NewProduct};

    fn product(name: &str, urls: &[&str]) -> NewProduct {
        NewProduct {
            product_name: name.to_string(),
            input_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn batch(request_id: Uuid, products: Vec<NewProduct>) -> Vec<ProductRecord> {
        products
            .into_iter()
            .map(|p| ProductRecord::pending(request_id, p))
            .collect()
    }

    #[test]
    fn test_insert_and_list_by_request() {
        let db = ProductDb::in_memory().unwrap();
        let request_a = Uuid::new_v4();
        let request_b = Uuid::new_v4();

        db.insert_batch(&batch(
            request_a,
            vec![product("SKU1", &["http://a/1.jpg"]), product("SKU2", &["http://a/2.jpg"])],
        ))
        .unwrap();
        db.insert_batch(&batch(request_b, vec![product("SKU3", &["http://b/1.jpg"])]))
            .unwrap();

        let listed = db.list_by_request(request_a).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.request_id == request_a));
        assert_eq!(listed[0].product_name, "SKU1");
        assert_eq!(listed[1].product_name, "SKU2");
        assert_eq!(listed[0].input_urls, vec!["http://a/1.jpg"]);
        assert!(listed.iter().all(|r| r.status == RecordStatus::Pending));
    }

    #[test]
    fn test_unknown_request_is_empty() {
        let db = ProductDb::in_memory().unwrap();
        assert!(db.list_by_request(Uuid::new_v4()).unwrap().is_empty());
        assert_eq!(db.batch_summary(Uuid::new_v4()).unwrap(), BatchSummary::default());
    }

    #[test]
    fn test_completed_record_is_terminal() {
        let db = ProductDb::in_memory().unwrap();
        let request_id = Uuid::new_v4();
        let records = batch(request_id, vec![product("SKU1", &["http://a/1.jpg", "http://a/2.jpg"])]);
        let id = records[0].id;
        db.insert_batch(&records).unwrap();

        let failures = vec![UrlFailure {
            url: "http://a/2.jpg".to_string(),
            stage: FailureStage::Fetch,
            message: "HTTP 404".to_string(),
        }];
        let refs = vec!["http://cdn/x.jpg".to_string()];
        assert!(db.complete_record(id, &refs, &failures).unwrap());

        // Second write and a revert attempt are both ignored
        assert!(!db.complete_record(id, &[], &[]).unwrap());
        assert!(!db
            .update_outcome(id, &[], &[], RecordStatus::Pending)
            .unwrap());

        let stored = db.get_record(id).unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Completed);
        assert_eq!(stored.output_refs, refs);
        assert_eq!(stored.failures, failures);
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_pending_request_ids_and_summary() {
        let db = ProductDb::in_memory().unwrap();
        let done = Uuid::new_v4();
        let open = Uuid::new_v4();

        let done_records = batch(done, vec![product("A", &["http://a/1.jpg"])]);
        db.insert_batch(&done_records).unwrap();
        db.complete_record(done_records[0].id, &[], &[]).unwrap();

        let open_records = batch(
            open,
            vec![product("B", &["http://b/1.jpg"]), product("C", &["http://c/1.jpg"])],
        );
        db.insert_batch(&open_records).unwrap();
        db.complete_record(open_records[0].id, &[], &[]).unwrap();

        assert_eq!(db.pending_request_ids().unwrap(), vec![open]);

        let summary = db.batch_summary(open).unwrap();
        assert_eq!(summary, BatchSummary { total: 2, pending: 1, completed: 1 });
        assert!(!summary.is_done());
        assert!(db.batch_summary(done).unwrap().is_done());

        let pending = db.list_pending_by_request(open).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].product_name, "C");

        let stats = db.stats().unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("products.db");
        let request_id = Uuid::new_v4();

        {
            let db = ProductDb::new(&path).unwrap();
            db.insert_batch(&batch(request_id, vec![product("A", &["http://a/1.jpg"])]))
                .unwrap();
        }

        let db = ProductDb::new(&path).unwrap();
        assert_eq!(db.list_by_request(request_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool() {
        let db = ProductDb::in_memory().unwrap();
        let request_id = Uuid::new_v4();
        let records = batch(request_id, vec![product("A", &["http://a/1.jpg"])]);

        db.run(move |db| db.insert_batch(&records)).await.unwrap();
        let listed = db.run(move |db| db.list_by_request(request_id)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    fn insert_raw(db: &ProductDb, request_id: &str, status: &str, created_at: &str) {
        db.conn
            .lock()
            .execute(
                "INSERT INTO products (id, request_id, position, product_name, input_urls, \
                 status, created_at) VALUES (?1, ?2, 0, 'SKU', '[]', ?3, ?4)",
                params![Uuid::new_v4().to_string(), request_id, status, created_at],
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_status_is_a_store_error() {
        let db = ProductDb::in_memory().unwrap();
        let request_id = Uuid::new_v4();
        insert_raw(&db, &request_id.to_string(), "DONE", &Utc::now().to_rfc3339());

        let err = db.list_by_request(request_id).unwrap_err();
        assert!(matches!(err, Error::Store(_)), "{}", err);
    }

    #[test]
    fn test_bad_timestamp_is_a_store_error() {
        let db = ProductDb::in_memory().unwrap();
        let request_id = Uuid::new_v4();
        insert_raw(&db, &request_id.to_string(), "PENDING", "yesterday");

        assert!(matches!(
            db.list_pending_by_request(request_id),
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn test_corrupt_pending_request_id_is_a_store_error() {
        let db = ProductDb::in_memory().unwrap();
        insert_raw(&db, "not-a-uuid", "PENDING", &Utc::now().to_rfc3339());

        assert!(matches!(db.pending_request_ids(), Err(Error::Store(_))));
    }
}
