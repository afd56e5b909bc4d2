//! Aggregator Core - keyed flow aggregation with timeouts
//!
//! # Architecture
//!
//! ```text
//! InputEvent → AggregationEngine (ingestion task)
//!     ├─ Schema (rebuilt per input format)
//!     ├─ FlowKey from key fields
//!     └─ AggregationTable (Arc<Mutex<..>>)
//!            ↑
//! TimeoutSupervisor (own task: passive scan / global flush)
//!     ↓
//! OutputRecord → RecordEmitter
//! ```

pub mod clock;
pub mod engine;
pub mod functions;
pub mod key;
pub mod output;
pub mod record;
pub mod rules;
pub mod schema;
pub mod supervisor;
pub mod table;

pub use clock::ObservedClock;
pub use engine::{ActiveTimeoutChecker, AggregationEngine};
pub use functions::{FieldAggregator, FieldMerge};
pub use key::FlowKey;
pub use output::OutputRecord;
pub use record::{FieldSpec, FieldType, FieldValue, FlowRecord, InputEvent, RecordLayout};
pub use rules::{AggregationRule, FuncKind, Role, RuleConfig, TimeoutKind, TimeoutPolicy};
pub use schema::{Schema, SchemaError};
pub use supervisor::{PassiveSchedule, TimeoutSupervisor};
pub use table::{AggregateState, AggregationTable, SharedTable, TableError};
