//! Aggregation table
//!
//! Owns every `AggregateState` of the current schema epoch. The table is
//! shared between the ingestion loop and the timeout supervisor as
//! `Arc<Mutex<AggregationTable>>`; callers copy finalized records out while
//! holding the lock and emit them after releasing it.

use super::functions::FieldMerge;
use super::key::FlowKey;
use super::output::OutputRecord;
use super::record::{FieldValue, FlowRecord, Slot};
use super::schema::Schema;
use super::supervisor::PassiveSchedule;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedTable = Arc<Mutex<AggregationTable>>;

/// Lock the shared table, recovering the guard if a holder panicked
pub fn lock_table(table: &Mutex<AggregationTable>) -> MutexGuard<'_, AggregationTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    DuplicateKey(FlowKey),
    NoSchema,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::DuplicateKey(key) => write!(f, "Key {} is already in the table", key),
            TableError::NoSchema => write!(f, "No schema installed"),
        }
    }
}

impl std::error::Error for TableError {}

/// Accumulator for one key within the current window
#[derive(Debug, Clone)]
pub struct AggregateState {
    pub count: u32,
    /// TIME_FIRST of the record that opened the window (ms)
    pub window_start: u64,
    pub time_first: u64,
    pub time_last: u64,
    values: Vec<u8>,
    var_values: Vec<Vec<u8>>,
    pub cleared: bool,
}

impl AggregateState {
    /// New state with every output field copied from the seeding record
    pub fn seed(schema: &Schema, record: &FlowRecord) -> Self {
        let mut values = vec![0u8; schema.fixed_len()];
        let mut var_values = vec![Vec::new(); schema.var_count()];

        for field in schema.fields() {
            let src = record.raw(field.source);
            match field.target {
                Slot::Fixed { offset, width } => values[offset..offset + width].copy_from_slice(src),
                Slot::Variable { index } => var_values[index] = src.to_vec(),
            }
        }

        let time_first = schema.time_first(record);
        Self {
            count: 1,
            window_start: time_first,
            time_first,
            time_last: schema.time_last(record),
            values,
            var_values,
            cleared: false,
        }
    }

    /// Reset in place from a record that opens a new window
    pub fn reseed(&mut self, schema: &Schema, record: &FlowRecord) {
        *self = Self::seed(schema, record);
        self.cleared = true;
    }

    /// Fold an incoming record into this state
    pub fn merge(&mut self, schema: &Schema, record: &FlowRecord) {
        self.count = self.count.saturating_add(1);
        self.time_first = self.time_first.min(schema.time_first(record));
        self.time_last = self.time_last.max(schema.time_last(record));

        for field in schema.fields() {
            match (field.aggregator.merge, field.target) {
                (FieldMerge::Noop, _) => {}
                (FieldMerge::Fixed(merge), Slot::Fixed { offset, width }) => {
                    merge(record.raw(field.source), &mut self.values[offset..offset + width]);
                }
                (FieldMerge::LastVariable, Slot::Variable { index }) => {
                    let src = record.raw(field.source);
                    let dst = &mut self.var_values[index];
                    dst.clear();
                    dst.extend_from_slice(src);
                }
                // Resolution never pairs a fixed merge with a variable slot
                _ => {}
            }
        }
    }

    /// Copy out the state with finalizers (average) applied
    pub fn finalize(&self, schema: &Schema) -> OutputRecord {
        let mut fields = Vec::with_capacity(schema.fields().len());

        for field in schema.fields() {
            let value = match field.target {
                Slot::Fixed { offset, width } => {
                    let mut bytes = self.values[offset..offset + width].to_vec();
                    if let Some(finalize) = field.aggregator.finalize {
                        finalize(&mut bytes, self.count);
                    }
                    FieldValue::decode_fixed(field.field_type, &bytes)
                }
                Slot::Variable { index } => {
                    FieldValue::decode_variable(field.field_type, &self.var_values[index])
                }
            };
            fields.push((field.name.clone(), value));
        }

        OutputRecord {
            schema_version: schema.version(),
            fields,
            count: self.count,
            time_first: self.time_first,
            time_last: self.time_last,
            continued: self.cleared,
        }
    }
}

/// Map from key to aggregate state for one schema epoch
#[derive(Debug, Default)]
pub struct AggregationTable {
    schema: Option<Arc<Schema>>,
    entries: FxHashMap<FlowKey, AggregateState>,
    schedule: PassiveSchedule,
}

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn lookup(&mut self, key: &FlowKey) -> Option<&mut AggregateState> {
        self.entries.get_mut(key)
    }

    pub fn get(&self, key: &FlowKey) -> Option<&AggregateState> {
        self.entries.get(key)
    }

    /// Create the state for a key seen for the first time
    pub fn insert_new(
        &mut self,
        key: FlowKey,
        seed: &FlowRecord,
    ) -> Result<&mut AggregateState, TableError> {
        let schema = self.schema.as_ref().ok_or(TableError::NoSchema)?;
        if self.entries.contains_key(&key) {
            return Err(TableError::DuplicateKey(key));
        }
        let state = AggregateState::seed(schema, seed);
        Ok(self.entries.entry(key).or_insert(state))
    }

    /// Merge a record into an existing key; false if the key is absent
    pub fn merge(&mut self, key: &FlowKey, record: &FlowRecord) -> Result<bool, TableError> {
        let schema = self.schema.as_ref().ok_or(TableError::NoSchema)?;
        match self.entries.get_mut(key) {
            Some(state) => {
                state.merge(schema, record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<AggregateState> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &AggregateState)> {
        self.entries.iter()
    }

    /// Remove one key and return its finalized record
    pub fn flush(&mut self, key: &FlowKey) -> Option<OutputRecord> {
        let schema = self.schema.clone()?;
        self.entries.remove(key).map(|state| state.finalize(&schema))
    }

    /// Remove every entry and return the finalized records
    pub fn flush_all(&mut self) -> Vec<OutputRecord> {
        self.schedule.clear();
        let Some(schema) = self.schema.clone() else {
            self.entries.clear();
            return Vec::new();
        };
        self.entries
            .drain()
            .map(|(_, state)| state.finalize(&schema))
            .collect()
    }

    /// Flush every entry of the old epoch, then install `schema`
    pub fn replace_schema(&mut self, schema: Arc<Schema>) -> Vec<OutputRecord> {
        let flushed = self.flush_all();
        self.schema = Some(schema);
        flushed
    }

    pub fn schedule_mut(&mut self) -> &mut PassiveSchedule {
        &mut self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::record::{FieldSpec, FieldType, RecordLayout};
    use crate::aggregator_core::rules::{FuncKind, Role, RuleConfig};

    fn make_schema() -> (Arc<RecordLayout>, Arc<Schema>) {
        let layout = Arc::new(RecordLayout::new(vec![
            FieldSpec::new("SRC_PORT", FieldType::Uint16),
            FieldSpec::new("BYTES", FieldType::Uint64),
            FieldSpec::new("RTT", FieldType::Double),
            FieldSpec::new("URL", FieldType::String),
            FieldSpec::new("TIME_FIRST", FieldType::Time),
            FieldSpec::new("TIME_LAST", FieldType::Time),
        ]));
        let rules = RuleConfig::new()
            .with_rule(Role::Key, "SRC_PORT")
            .with_rule(Role::Value(FuncKind::Sum), "BYTES")
            .with_rule(Role::Value(FuncKind::Avg), "RTT")
            .with_rule(Role::Value(FuncKind::Last), "URL");
        let schema = Arc::new(Schema::build(&rules, layout.clone(), 1).unwrap());
        (layout, schema)
    }

    fn make_record(layout: &Arc<RecordLayout>, port: u16, bytes: u64, rtt: f64, url: &str, first: u64, last: u64) -> FlowRecord {
        FlowRecord::new(layout.clone())
            .with("SRC_PORT", FieldValue::Uint16(port)).unwrap()
            .with("BYTES", FieldValue::Uint64(bytes)).unwrap()
            .with("RTT", FieldValue::Double(rtt)).unwrap()
            .with("URL", FieldValue::String(url.to_string())).unwrap()
            .with("TIME_FIRST", FieldValue::Time(first)).unwrap()
            .with("TIME_LAST", FieldValue::Time(last)).unwrap()
    }

    #[test]
    fn test_insert_then_merge() {
        let (layout, schema) = make_schema();
        let mut table = AggregationTable::new();
        table.replace_schema(schema.clone());

        let a = make_record(&layout, 53, 100, 2.0, "a", 5_000, 6_000);
        let b = make_record(&layout, 53, 50, 4.0, "b", 1_000, 9_000);
        let key = schema.build_key(&a);

        table.insert_new(key.clone(), &a).unwrap();
        assert!(table.merge(&key, &b).unwrap());

        let state = table.get(&key).unwrap();
        assert_eq!(state.count, 2);
        assert_eq!(state.time_first, 1_000);
        assert_eq!(state.time_last, 9_000);
        assert_eq!(state.window_start, 5_000);

        let out = table.flush(&key).unwrap();
        assert_eq!(out.get("BYTES"), Some(&FieldValue::Uint64(150)));
        assert_eq!(out.get("RTT"), Some(&FieldValue::Double(3.0)));
        assert_eq!(out.get("URL"), Some(&FieldValue::String("b".to_string())));
        assert_eq!(out.get("SRC_PORT"), Some(&FieldValue::Uint16(53)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_existing_key_fails() {
        let (layout, schema) = make_schema();
        let mut table = AggregationTable::new();
        table.replace_schema(schema.clone());

        let a = make_record(&layout, 53, 1, 1.0, "", 0, 0);
        let key = schema.build_key(&a);
        table.insert_new(key.clone(), &a).unwrap();
        assert_eq!(table.insert_new(key.clone(), &a).unwrap_err(), TableError::DuplicateKey(key));
    }

    #[test]
    fn test_insert_without_schema_fails() {
        let (layout, _) = make_schema();
        let mut table = AggregationTable::new();
        let a = make_record(&layout, 53, 1, 1.0, "", 0, 0);
        assert_eq!(table.insert_new(FlowKey::empty(), &a).unwrap_err(), TableError::NoSchema);
    }

    #[test]
    fn test_reseed_marks_continuation() {
        let (layout, schema) = make_schema();
        let a = make_record(&layout, 80, 10, 1.0, "x", 0, 1_000);
        let c = make_record(&layout, 80, 30, 1.0, "y", 20_000, 21_000);

        let mut state = AggregateState::seed(&schema, &a);
        state.merge(&schema, &a);
        state.reseed(&schema, &c);

        assert_eq!(state.count, 1);
        assert_eq!(state.window_start, 20_000);
        assert!(state.cleared);
        assert!(state.finalize(&schema).continued);
    }

    #[test]
    fn test_replace_schema_flushes_everything() {
        let (layout, schema) = make_schema();
        let mut table = AggregationTable::new();
        assert!(table.replace_schema(schema.clone()).is_empty());

        for port in [1u16, 2, 3] {
            let r = make_record(&layout, port, 1, 1.0, "", 0, 0);
            table.insert_new(schema.build_key(&r), &r).unwrap();
        }
        table.schedule_mut().push(FlowKey::empty(), 0);

        let flushed = table.replace_schema(schema.clone());
        assert_eq!(flushed.len(), 3);
        assert!(table.is_empty());
        assert!(table.schedule_mut().is_empty());
    }
}
