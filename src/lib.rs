//! flowagg - keyed flow record aggregation
//!
//! Records arriving from a source are grouped by their key fields and merged
//! into per-key aggregates, which are emitted when an active, passive or
//! global timeout fires, when the input format changes, or at shutdown.

pub mod aggregator_core;
pub mod cli;
pub mod emitter;
pub mod error;
pub mod pipeline;
pub mod source;

pub use aggregator_core::{AggregationEngine, OutputRecord, RuleConfig, TimeoutPolicy};
pub use emitter::{open_emitter, BackendType, EmitError, RecordEmitter};
pub use error::AggregatorError;
pub use pipeline::{run_pipeline, RunSummary, RuntimeConfig};
