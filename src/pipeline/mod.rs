//! # Aggregation runtime
//!
//! Wires the input channel, the ingestion loop and the timeout supervisor
//! together and owns the shutdown sequence.
//!
//! ## Module Organization
//!
//! - `config` - Runtime tuning from environment variables
//! - `ingestion` - Channel-driven ingestion loop
//! - `runtime` - Task orchestration and final drain

pub mod config;
pub mod ingestion;
pub mod runtime;

pub use config::RuntimeConfig;
pub use ingestion::{run_ingestion, IngestionSummary, StopReason};
pub use runtime::{run_pipeline, RunSummary};
