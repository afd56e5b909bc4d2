//! Process orchestration: ingestion + supervisor, then shutdown drain
//!
//! Shutdown order:
//! 1. Ingestion loop returns (end of stream, channel close, stop signal or
//!    fatal schema error)
//! 2. Supervisor is signalled and joined
//! 3. Remaining aggregates are drained, one send attempt each
//! 4. Emitter is finished (final flush, optional EOS marker)

use super::config::RuntimeConfig;
use super::ingestion::{run_ingestion, StopReason};
use crate::aggregator_core::engine::AggregationEngine;
use crate::aggregator_core::record::InputEvent;
use crate::aggregator_core::rules::RuleConfig;
use crate::aggregator_core::supervisor::TimeoutSupervisor;
use crate::emitter::retry::{emit_all, EmitStats, RetryPolicy};
use crate::emitter::RecordEmitter;
use crate::error::AggregatorError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub records: u64,
    pub format_changes: u64,
    /// Aggregates sent successfully (all paths)
    pub emitted: u64,
    /// Aggregates dropped after failed sends
    pub dropped: u64,
    /// Aggregates left in the table at shutdown
    pub drained: u64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn print(&self) {
        log::info!("📊 Aggregation summary:");
        log::info!("   ├─ Records processed: {}", self.records);
        log::info!("   ├─ Format changes: {}", self.format_changes);
        log::info!("   ├─ Aggregates emitted: {} ({} at shutdown)", self.emitted, self.drained);
        log::info!("   ├─ Aggregates dropped: {}", self.dropped);
        log::info!("   └─ Stopped by: {:?}", self.stop_reason);
    }
}

/// Run the aggregation pipeline over `rx` until it ends, then drain.
///
/// A fatal error from ingestion is returned after the drain completes.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<InputEvent>,
    rules: RuleConfig,
    emitter: Arc<dyn RecordEmitter>,
    config: &RuntimeConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<RunSummary, AggregatorError> {
    let mut engine = AggregationEngine::new(rules);

    let (supervisor_stop_tx, supervisor_stop_rx) = watch::channel(false);
    let supervisor = TimeoutSupervisor::new(
        engine.table(),
        engine.clock(),
        engine.policy(),
        config.scan_interval(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run(
        emitter.clone(),
        config.retry_policy(),
        supervisor_stop_rx,
    ));

    let ingestion = run_ingestion(&mut rx, &mut engine, emitter.as_ref(), config, &mut stop).await;
    // Closing the channel stops the source
    drop(rx);

    if let Err(e) = &ingestion {
        log::error!("❌ Ingestion failed: {}", e);
    }

    let _ = supervisor_stop_tx.send(true);
    let supervisor_stats = match supervisor_handle.await {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("❌ Timeout supervisor task failed: {}", e);
            EmitStats::default()
        }
    };

    // Forced drain: best effort, single attempt per aggregate
    log::info!("🔄 Draining {} aggregate(s)...", engine.table_len());
    let remaining = engine.drain();
    let drained = remaining.len() as u64;
    let drain_stats = emit_all(emitter.as_ref(), remaining, &RetryPolicy::single_attempt()).await;

    if let Err(e) = emitter.finish().await {
        log::error!("❌ Failed to finish {} output: {}", emitter.backend_type(), e);
    }
    log::info!("✅ Final drain complete");

    let ingestion = ingestion?;
    let mut emit = ingestion.emit;
    emit += supervisor_stats;
    emit += drain_stats;

    Ok(RunSummary {
        records: ingestion.records,
        format_changes: ingestion.format_changes,
        emitted: emit.sent,
        dropped: emit.dropped,
        drained,
        stop_reason: ingestion.reason,
    })
}
