//! Versioned schema: rules resolved against the current record layout
//!
//! A schema is immutable once built. It maps every rule to the byte slot of
//! its field in incoming records (`source`) and in aggregate storage
//! (`target`), and carries the resolved aggregator for each value field.
//! A format change produces a new schema with the next version number.

use super::functions::FieldAggregator;
use super::key::FlowKey;
use super::record::{FieldType, FlowRecord, RecordLayout, Slot};
use super::rules::{Role, RuleConfig, TIME_FIRST, TIME_LAST};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A rule names a field absent from the input layout
    MissingField(String),
    /// Key fields must be fixed-width
    VariableLengthKey(String),
    /// TIME_FIRST / TIME_LAST missing or not of type time
    MissingTimeField(&'static str),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MissingField(name) => {
                write!(f, "Field {} is not present in the input format", name)
            }
            SchemaError::VariableLengthKey(name) => {
                write!(f, "Field {} is variable-length and cannot be part of the key", name)
            }
            SchemaError::MissingTimeField(name) => {
                write!(f, "Input format has no {} field of type time", name)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug, Clone)]
pub struct KeyField {
    pub name: String,
    pub offset: usize,
    pub width: usize,
}

/// One field of the aggregate output, in rule order
#[derive(Debug, Clone)]
pub struct OutputField {
    pub name: String,
    pub field_type: FieldType,
    pub role: Role,
    /// Slot in incoming records
    pub source: Slot,
    /// Slot in aggregate storage
    pub target: Slot,
    pub aggregator: FieldAggregator,
}

#[derive(Debug)]
pub struct Schema {
    version: u64,
    layout: Arc<RecordLayout>,
    key_fields: Vec<KeyField>,
    key_width: usize,
    fields: Vec<OutputField>,
    fixed_len: usize,
    var_count: usize,
    time_first_offset: usize,
    time_last_offset: usize,
}

impl Schema {
    pub fn build(
        rules: &RuleConfig,
        layout: Arc<RecordLayout>,
        version: u64,
    ) -> Result<Self, SchemaError> {
        let time_first_offset = time_offset(&layout, TIME_FIRST)?;
        let time_last_offset = time_offset(&layout, TIME_LAST)?;

        let mut key_fields = Vec::new();
        let mut key_width = 0;
        let mut fields = Vec::with_capacity(rules.rules().len());
        let mut fixed_len = 0;
        let mut var_count = 0;

        for rule in rules.rules() {
            let index = layout
                .index_of(&rule.field_name)
                .ok_or_else(|| SchemaError::MissingField(rule.field_name.clone()))?;
            let spec = layout.field(index);
            let source = layout.slot(index);

            let aggregator = match (rule.role, source) {
                (Role::Key, Slot::Fixed { offset, width }) => {
                    key_fields.push(KeyField {
                        name: spec.name.clone(),
                        offset,
                        width,
                    });
                    key_width += width;
                    FieldAggregator::NOOP
                }
                (Role::Key, Slot::Variable { .. }) => {
                    return Err(SchemaError::VariableLengthKey(spec.name.clone()));
                }
                (Role::Value(func), _) => FieldAggregator::resolve(func, spec.field_type, &spec.name),
            };

            let target = match source {
                Slot::Fixed { width, .. } => {
                    let slot = Slot::Fixed { offset: fixed_len, width };
                    fixed_len += width;
                    slot
                }
                Slot::Variable { .. } => {
                    let slot = Slot::Variable { index: var_count };
                    var_count += 1;
                    slot
                }
            };

            fields.push(OutputField {
                name: spec.name.clone(),
                field_type: spec.field_type,
                role: rule.role,
                source,
                target,
                aggregator,
            });
        }

        Ok(Self {
            version,
            layout,
            key_fields,
            key_width,
            fields,
            fixed_len,
            var_count,
            time_first_offset,
            time_last_offset,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn layout(&self) -> &Arc<RecordLayout> {
        &self.layout
    }

    /// Whether records of `layout` can be processed under this schema
    pub fn accepts(&self, layout: &Arc<RecordLayout>) -> bool {
        Arc::ptr_eq(&self.layout, layout) || *self.layout == **layout
    }

    pub fn key_fields(&self) -> &[KeyField] {
        &self.key_fields
    }

    pub fn key_width(&self) -> usize {
        self.key_width
    }

    pub fn fields(&self) -> &[OutputField] {
        &self.fields
    }

    /// Size of the fixed-width aggregate storage
    pub fn fixed_len(&self) -> usize {
        self.fixed_len
    }

    pub fn var_count(&self) -> usize {
        self.var_count
    }

    /// Concatenate the record's key-field bytes in rule order
    pub fn build_key(&self, record: &FlowRecord) -> FlowKey {
        let mut bytes = Vec::with_capacity(self.key_width);
        for key in &self.key_fields {
            bytes.extend_from_slice(record.raw(Slot::Fixed {
                offset: key.offset,
                width: key.width,
            }));
        }
        FlowKey::from_bytes(bytes)
    }

    pub fn time_first(&self, record: &FlowRecord) -> u64 {
        record.read_time(self.time_first_offset)
    }

    pub fn time_last(&self, record: &FlowRecord) -> u64 {
        record.read_time(self.time_last_offset)
    }

    pub fn print(&self) {
        log::info!("🧩 Schema v{} ready", self.version);
        log::info!(
            "   ├─ Key: {} field(s), {} bytes",
            self.key_fields.len(),
            self.key_width
        );
        log::info!("   └─ Output: {} field(s) + COUNT, TIME_FIRST, TIME_LAST", self.fields.len());
    }
}

fn time_offset(layout: &RecordLayout, name: &'static str) -> Result<usize, SchemaError> {
    let index = layout
        .index_of(name)
        .ok_or(SchemaError::MissingTimeField(name))?;
    match (layout.field(index).field_type, layout.slot(index)) {
        (FieldType::Time, Slot::Fixed { offset, .. }) => Ok(offset),
        _ => Err(SchemaError::MissingTimeField(name)),
    }
}
