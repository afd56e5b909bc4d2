//! SQLite backend for aggregates
//!
//! Rows are batched and written in one transaction per flush. Field values
//! are stored as the record's JSON object so that any schema fits one table.

use super::{EmitError, RecordEmitter};
use crate::aggregator_core::output::OutputRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

struct PendingRow {
    schema_version: u64,
    count: u32,
    time_first: u64,
    time_last: u64,
    continued: bool,
    record: String,
}

struct SqliteState {
    conn: Connection,
    batch: Vec<PendingRow>,
    last_flush: Instant,
}

impl SqliteState {
    fn flush_batch(&mut self) -> Result<(), EmitError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        for row in &self.batch {
            tx.execute(
                "INSERT INTO aggregates
                 (schema_version, count, time_first, time_last, continued, record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.schema_version as i64,
                    row.count,
                    row.time_first as i64,
                    row.time_last as i64,
                    row.continued,
                    row.record,
                ],
            )?;
        }
        tx.commit()?;

        log::debug!("✅ Flushed {} aggregates to SQLite", self.batch.len());
        self.batch.clear();
        self.last_flush = Instant::now();
        Ok(())
    }
}

pub struct SqliteEmitter {
    state: Mutex<SqliteState>,
    batch_size: usize,
    flush_interval_secs: u64,
}

impl SqliteEmitter {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, EmitError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_version INTEGER NOT NULL,
                count INTEGER NOT NULL,
                time_first INTEGER NOT NULL,
                time_last INTEGER NOT NULL,
                continued INTEGER NOT NULL,
                record TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_aggregates_time ON aggregates(time_first)",
            [],
        )?;

        log::info!("✅ SQLite aggregate store initialized with WAL mode");

        Ok(Self {
            state: Mutex::new(SqliteState {
                conn,
                batch: Vec::with_capacity(100),
                last_flush: Instant::now(),
            }),
            batch_size: 100,
            flush_interval_secs: 2,
        })
    }

    fn state(&self) -> MutexGuard<'_, SqliteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordEmitter for SqliteEmitter {
    async fn send(&self, record: &OutputRecord) -> Result<(), EmitError> {
        let row = PendingRow {
            schema_version: record.schema_version,
            count: record.count,
            time_first: record.time_first,
            time_last: record.time_last,
            continued: record.continued,
            record: serde_json::to_string(record)?,
        };

        let mut state = self.state();
        state.batch.push(row);

        // Auto-flush if batch full or time elapsed
        if state.batch.len() >= self.batch_size
            || state.last_flush.elapsed().as_secs() >= self.flush_interval_secs
        {
            if let Err(e) = state.flush_batch() {
                // The failed transaction rolled back; only this record is reported
                // as failed, rows queued by earlier sends stay for the next flush
                state.batch.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        self.state().flush_batch()
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

impl Drop for SqliteEmitter {
    fn drop(&mut self) {
        if let Err(e) = self.state().flush_batch() {
            log::error!("❌ Failed to flush SQLite batch on shutdown: {}", e);
        }
    }
}
