//! Timeout supervisor - passive and global eviction
//!
//! Runs as its own task next to the ingestion loop:
//! - Global: every `active_secs`, flush the whole table
//! - Passive / mixed: every scan interval, evict keys idle for `passive_secs`
//!   measured against the observed clock
//! - Active only: nothing to do, eviction happens on ingest
//!
//! Each tick holds the table lock only while copying finalized records out;
//! emission happens after the lock is released.

use super::clock::ObservedClock;
use super::key::FlowKey;
use super::output::OutputRecord;
use super::rules::{TimeoutKind, TimeoutPolicy};
use super::table::{lock_table, SharedTable};
use crate::emitter::retry::{emit_all, EmitStats, RetryPolicy};
use crate::emitter::RecordEmitter;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Min-ordered `(last observed ms, key)` notifications for passive eviction
#[derive(Debug, Default)]
pub struct PassiveSchedule {
    heap: BinaryHeap<Reverse<(u64, FlowKey)>>,
}

impl PassiveSchedule {
    pub fn push(&mut self, key: FlowKey, last_observed_ms: u64) {
        self.heap.push(Reverse((last_observed_ms, key)));
    }

    /// Pop every notification whose `last + passive` is behind `now` (seconds)
    pub fn pop_due(&mut self, now_secs: u64, passive_secs: u64) -> Vec<(u64, FlowKey)> {
        let mut due = Vec::new();
        while let Some(Reverse((last_ms, _))) = self.heap.peek() {
            if last_ms / 1000 + passive_secs >= now_secs {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

pub struct TimeoutSupervisor {
    table: SharedTable,
    clock: Arc<ObservedClock>,
    policy: TimeoutPolicy,
    scan_interval: Duration,
}

impl TimeoutSupervisor {
    pub fn new(
        table: SharedTable,
        clock: Arc<ObservedClock>,
        policy: TimeoutPolicy,
        scan_interval: Duration,
    ) -> Self {
        Self {
            table,
            clock,
            policy,
            scan_interval,
        }
    }

    /// One passive tick: evict keys idle longer than the passive timeout
    pub fn passive_scan(&self) -> Vec<OutputRecord> {
        let now_secs = self.clock.now_secs();
        let passive_secs = self.policy.passive_secs;

        let mut table = lock_table(&self.table);
        let Some(schema) = table.schema().cloned() else {
            return Vec::new();
        };

        let due = table.schedule_mut().pop_due(now_secs, passive_secs);
        let mut flushed = Vec::new();

        for (_, key) in due {
            // Already evicted by another path
            let Some(time_last) = table.get(&key).map(|state| state.time_last) else {
                continue;
            };

            if time_last / 1000 + passive_secs < now_secs {
                if let Some(state) = table.remove(&key) {
                    flushed.push(state.finalize(&schema));
                }
            } else {
                table.schedule_mut().push(key, time_last);
            }
        }

        flushed
    }

    /// One global tick: flush everything
    pub fn global_flush(&self) -> Vec<OutputRecord> {
        lock_table(&self.table).flush_all()
    }

    /// Run until the stop signal is set (or its sender dropped)
    pub async fn run(
        self,
        emitter: Arc<dyn RecordEmitter>,
        retry: RetryPolicy,
        mut stop: watch::Receiver<bool>,
    ) -> EmitStats {
        let mut stats = EmitStats::default();

        let period = match self.policy.kind {
            TimeoutKind::Active => {
                log::info!("⏰ Timeout supervisor idle (active timeout handled on ingest)");
                while !*stop.borrow() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
                return stats;
            }
            TimeoutKind::Global => Duration::from_secs(self.policy.active_secs),
            TimeoutKind::Passive | TimeoutKind::ActivePassive => self.scan_interval,
        };

        log::info!("⏰ Starting timeout supervisor ({})", self.policy);
        log::info!("   └─ Tick interval: {}ms", period.as_millis());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let flushed = match self.policy.kind {
                        TimeoutKind::Global => self.global_flush(),
                        _ => self.passive_scan(),
                    };
                    if flushed.is_empty() {
                        continue;
                    }

                    let tick_stats = emit_all(emitter.as_ref(), flushed, &retry).await;
                    log::debug!(
                        "🧹 Supervisor evicted {} aggregate(s) ({} dropped)",
                        tick_stats.sent + tick_stats.dropped,
                        tick_stats.dropped
                    );
                    stats += tick_stats;
                }
            }
        }

        log::info!("✅ Timeout supervisor stopped ({} emitted, {} dropped)", stats.sent, stats.dropped);
        stats
    }
}
