//! Ingestion loop - applies input events to the aggregation engine
//!
//! Main loop:
//! 1. Receives events from the source via mpsc channel (bounded wait, so a
//!    stop signal is observed promptly)
//! 2. Applies format changes and records through `AggregationEngine`
//! 3. Emits aggregates flushed by format changes and active timeouts,
//!    after the table lock has been released
//!
//! Returns on end of stream, channel close or stop signal. A schema build
//! failure is returned as a fatal error; the caller still drains the table.

use super::config::RuntimeConfig;
use crate::aggregator_core::engine::AggregationEngine;
use crate::aggregator_core::record::InputEvent;
use crate::emitter::retry::{emit_all, EmitStats};
use crate::emitter::RecordEmitter;
use crate::error::AggregatorError;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    ChannelClosed,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestionSummary {
    pub records: u64,
    pub format_changes: u64,
    pub emit: EmitStats,
    pub reason: StopReason,
}

pub async fn run_ingestion(
    rx: &mut mpsc::Receiver<InputEvent>,
    engine: &mut AggregationEngine,
    emitter: &dyn RecordEmitter,
    config: &RuntimeConfig,
    stop: &mut watch::Receiver<bool>,
) -> Result<IngestionSummary, AggregatorError> {
    log::info!("🚀 Starting ingestion loop");
    log::info!("   ├─ Timeout policy: {}", engine.policy());
    log::info!("   └─ Waiting for records...");

    let retry = config.retry_policy();
    let recv_timeout = config.recv_timeout();
    let mut stop_open = true;

    let mut records = 0u64;
    let mut format_changes = 0u64;
    let mut emit = EmitStats::default();
    let mut window_records = 0u64;
    let mut last_log_time = Instant::now();

    let reason = loop {
        if *stop.borrow() {
            break StopReason::Stopped;
        }

        // Log throughput every stats interval
        if last_log_time.elapsed().as_secs() >= config.stats_interval_secs {
            let per_sec = window_records as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} records/sec (total: {}) | table: {} | channel: {}/{}",
                per_sec,
                records,
                engine.table_len(),
                rx.len(),
                config.channel_buffer
            );
            if let Err(e) = emitter.flush().await {
                log::warn!("⚠️  Output flush failed: {}", e);
            }
            last_log_time = Instant::now();
            window_records = 0;
        }

        let event = tokio::select! {
            changed = stop.changed(), if stop_open => {
                // Sender gone: no stop can arrive anymore
                if changed.is_err() {
                    stop_open = false;
                }
                continue;
            }
            received = timeout(recv_timeout, rx.recv()) => match received {
                Err(_) => continue,
                Ok(None) => {
                    log::warn!("⚠️  Input channel closed, stopping ingestion");
                    break StopReason::ChannelClosed;
                }
                Ok(Some(event)) => event,
            },
        };

        match event {
            InputEvent::FormatChanged(layout) => {
                format_changes += 1;
                let flushed = engine.on_format_change(layout)?;
                if !flushed.is_empty() {
                    emit += emit_all(emitter, flushed, &retry).await;
                }
            }
            InputEvent::Record(record) => {
                let flushed = engine.process_record(&record)?;
                records += 1;
                window_records += 1;
                if !flushed.is_empty() {
                    emit += emit_all(emitter, flushed, &retry).await;
                }
            }
            InputEvent::EndOfStream => {
                log::info!("🏁 End of stream received");
                break StopReason::EndOfStream;
            }
        }
    };

    log::info!("✅ Ingestion stopped ({:?}, {} records)", reason, records);
    Ok(IngestionSummary {
        records,
        format_changes,
        emit,
        reason,
    })
}
