//! Bounded retry at the emitter boundary

use super::{EmitError, RecordEmitter};
use crate::aggregator_core::output::OutputRecord;
use std::ops::AddAssign;
use std::time::Duration;
use tokio::time::sleep;

/// Default send attempts per record
pub const DEFAULT_SEND_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_ms: u64, max_ms: u64, retries: u32) -> Self {
        Self {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = std::cmp::min(
            self.initial_delay_ms.saturating_mul(2_u64.saturating_pow(self.current_attempt)),
            self.max_delay_ms,
        );

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay
        );

        sleep(Duration::from_millis(delay)).await;
        self.current_attempt += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record (at least one)
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SEND_RETRIES,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Used for the shutdown drain
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_backoff_ms,
            self.max_backoff_ms,
            self.max_attempts.saturating_sub(1),
        )
    }
}

/// Sent/dropped counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub sent: u64,
    pub dropped: u64,
}

impl AddAssign for EmitStats {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.dropped += other.dropped;
    }
}

/// Send one record, retrying with backoff; returns the last error on exhaustion
pub async fn send_with_retry(
    emitter: &dyn RecordEmitter,
    record: &OutputRecord,
    policy: &RetryPolicy,
) -> Result<(), EmitError> {
    let mut backoff = policy.backoff();
    loop {
        match emitter.send(record).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!("⚠️  {} send failed: {}", emitter.backend_type(), e);
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
            }
        }
    }
}

/// Send a batch of records; failures are logged and the record dropped
pub async fn emit_all(
    emitter: &dyn RecordEmitter,
    records: Vec<OutputRecord>,
    policy: &RetryPolicy,
) -> EmitStats {
    let mut stats = EmitStats::default();
    for record in &records {
        match send_with_retry(emitter, record, policy).await {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                log::error!(
                    "❌ Dropping aggregate (COUNT={}) after {} attempt(s): {}",
                    record.count,
                    policy.max_attempts.max(1),
                    e
                );
                stats.dropped += 1;
            }
        }
    }
    stats
}
