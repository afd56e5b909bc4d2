//! In-memory backend, for tests and embedding

use super::{EmitError, RecordEmitter};
use crate::aggregator_core::output::OutputRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct CollectingEmitter {
    records: Mutex<Vec<OutputRecord>>,
    failures_remaining: AtomicUsize,
    finished: AtomicBool,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `failures` sends
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    /// Snapshot of everything sent so far
    pub fn records(&self) -> Vec<OutputRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordEmitter for CollectingEmitter {
    async fn send(&self, record: &OutputRecord) -> Result<(), EmitError> {
        let rejected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(EmitError::Rejected("injected failure".to_string()));
        }

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        Ok(())
    }

    async fn finish(&self) -> Result<(), EmitError> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "Memory"
    }
}
