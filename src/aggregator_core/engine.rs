//! Ingestion-side aggregation engine
//!
//! Owns the rules and the current schema epoch, and applies each incoming
//! record to the shared table:
//!
//! ```text
//! FlowRecord
//!     ↓ (schema rebuilt on first record / format change)
//! Schema::build_key()
//!     ↓
//! AggregationTable::lookup()
//!     ↓
//! merge | active-timeout flush + reseed | insert_new
//! ```
//!
//! Records that must be emitted are returned to the caller, which sends them
//! after the table lock has been released.

use super::clock::ObservedClock;
use super::output::OutputRecord;
use super::record::{FlowRecord, RecordLayout};
use super::rules::{RuleConfig, TimeoutPolicy};
use super::schema::{Schema, SchemaError};
use super::table::{lock_table, AggregateState, AggregationTable, SharedTable};
use crate::error::AggregatorError;
use std::sync::{Arc, Mutex};

/// Decides whether an incoming record opens a new window for its key
#[derive(Debug, Clone, Copy)]
pub struct ActiveTimeoutChecker {
    active_secs: Option<u64>,
}

impl ActiveTimeoutChecker {
    pub fn new(policy: &TimeoutPolicy) -> Self {
        Self {
            active_secs: policy.kind.has_active().then_some(policy.active_secs),
        }
    }

    /// `window_start + active < incoming TIME_FIRST`, in whole seconds
    pub fn starts_new_window(&self, state: &AggregateState, incoming_first_ms: u64) -> bool {
        match self.active_secs {
            Some(active) => state.window_start / 1000 + active < incoming_first_ms / 1000,
            None => false,
        }
    }
}

pub struct AggregationEngine {
    rules: RuleConfig,
    policy: TimeoutPolicy,
    checker: ActiveTimeoutChecker,
    table: SharedTable,
    clock: Arc<ObservedClock>,
    schema_version: u64,
    records_processed: u64,
}

impl AggregationEngine {
    pub fn new(rules: RuleConfig) -> Self {
        let policy = rules.timeout();
        Self {
            rules,
            policy,
            checker: ActiveTimeoutChecker::new(&policy),
            table: Arc::new(Mutex::new(AggregationTable::new())),
            clock: Arc::new(ObservedClock::new()),
            schema_version: 0,
            records_processed: 0,
        }
    }

    /// Shared table handle for the supervisor
    pub fn table(&self) -> SharedTable {
        self.table.clone()
    }

    pub fn clock(&self) -> Arc<ObservedClock> {
        self.clock.clone()
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed
    }

    pub fn table_len(&self) -> usize {
        lock_table(&self.table).len()
    }

    /// Build the next schema epoch for `layout`, flushing the current one.
    /// On error the current epoch is left untouched.
    pub fn on_format_change(
        &mut self,
        layout: Arc<RecordLayout>,
    ) -> Result<Vec<OutputRecord>, SchemaError> {
        self.install_schema(layout).map(|(_, flushed)| flushed)
    }

    fn install_schema(
        &mut self,
        layout: Arc<RecordLayout>,
    ) -> Result<(Arc<Schema>, Vec<OutputRecord>), SchemaError> {
        let version = self.schema_version + 1;
        let schema = Arc::new(Schema::build(&self.rules, layout, version)?);
        self.schema_version = version;
        schema.print();

        let flushed = lock_table(&self.table).replace_schema(schema.clone());
        if !flushed.is_empty() {
            log::info!(
                "🔄 Input format changed, flushed {} aggregate(s) from schema v{}",
                flushed.len(),
                version - 1
            );
        }
        Ok((schema, flushed))
    }

    /// Apply one record. Returns aggregates that must be emitted.
    pub fn process_record(
        &mut self,
        record: &FlowRecord,
    ) -> Result<Vec<OutputRecord>, AggregatorError> {
        let mut emitted = Vec::new();

        let current = lock_table(&self.table).schema().cloned();
        let schema = match current {
            Some(schema) if schema.accepts(record.layout()) => schema,
            _ => {
                let (schema, flushed) = self.install_schema(record.layout().clone())?;
                emitted.extend(flushed);
                schema
            }
        };

        let time_first = schema.time_first(record);
        self.clock.advance(schema.time_last(record));
        let key = schema.build_key(record);

        {
            let mut table = lock_table(&self.table);
            match table.lookup(&key) {
                Some(state) => {
                    if self.checker.starts_new_window(state, time_first) {
                        emitted.push(state.finalize(&schema));
                        state.reseed(&schema, record);
                    } else {
                        state.merge(&schema, record);
                    }
                }
                None => {
                    let time_last = table.insert_new(key.clone(), record)?.time_last;
                    if self.policy.kind.has_passive() {
                        table.schedule_mut().push(key, time_last);
                    }
                }
            }
        } // Lock released here

        self.records_processed += 1;
        Ok(emitted)
    }

    /// Remove and finalize every aggregate (shutdown)
    pub fn drain(&self) -> Vec<OutputRecord> {
        lock_table(&self.table).flush_all()
    }
}
