//! Integration tests for the aggregation runtime
//!
//! Drive `run_pipeline` end to end through its input channel, with the
//! in-memory emitter standing in for the output backend.
//!
//! Covered:
//! - Active window boundary and shutdown drain
//! - Passive eviction driven by other keys' traffic
//! - Mixed active + passive policy
//! - Global flush
//! - Format change flushes the previous epoch first
//! - Fatal schema error still drains what was aggregated

#[cfg(test)]
mod pipeline_integration_tests {
    use flowagg::aggregator_core::record::{FieldSpec, FieldType, FieldValue, FlowRecord, InputEvent, RecordLayout};
    use flowagg::aggregator_core::rules::{FuncKind, Role, RuleConfig};
    use flowagg::emitter::{CollectingEmitter, RecordEmitter};
    use flowagg::error::AggregatorError;
    use flowagg::pipeline::{run_pipeline, RunSummary, RuntimeConfig, StopReason};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Duration};

    fn make_layout() -> Arc<RecordLayout> {
        Arc::new(RecordLayout::new(vec![
            FieldSpec::new("SRC_IP", FieldType::Ip),
            FieldSpec::new("BYTES", FieldType::Uint64),
            FieldSpec::new("TIME_FIRST", FieldType::Time),
            FieldSpec::new("TIME_LAST", FieldType::Time),
        ]))
    }

    fn ip(host: u8) -> FieldValue {
        FieldValue::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)))
    }

    fn record(layout: &Arc<RecordLayout>, host: u8, bytes: u64, secs: u64) -> InputEvent {
        let record = FlowRecord::new(layout.clone())
            .with("SRC_IP", ip(host)).unwrap()
            .with("BYTES", FieldValue::Uint64(bytes)).unwrap()
            .with("TIME_FIRST", FieldValue::Time(secs * 1000)).unwrap()
            .with("TIME_LAST", FieldValue::Time(secs * 1000)).unwrap();
        InputEvent::Record(record)
    }

    fn sum_by_src(timeout_spec: &str) -> RuleConfig {
        RuleConfig::new()
            .with_rule(Role::Key, "SRC_IP")
            .with_rule(Role::Value(FuncKind::Sum), "BYTES")
            .with_timeout(timeout_spec)
    }

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            recv_timeout_ms: 20,
            retry_backoff_ms: 1,
            scan_interval_ms: 20,
            ..RuntimeConfig::default()
        }
    }

    struct Harness {
        tx: mpsc::Sender<InputEvent>,
        stop_tx: watch::Sender<bool>,
        collector: Arc<CollectingEmitter>,
        handle: JoinHandle<Result<RunSummary, AggregatorError>>,
    }

    fn start(rules: RuleConfig) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let collector = Arc::new(CollectingEmitter::new());
        let emitter: Arc<dyn RecordEmitter> = collector.clone();
        let config = test_config();

        let handle = tokio::spawn(async move { run_pipeline(rx, rules, emitter, &config, stop_rx).await });

        Harness {
            tx,
            stop_tx,
            collector,
            handle,
        }
    }

    async fn join(handle: JoinHandle<Result<RunSummary, AggregatorError>>) -> Result<RunSummary, AggregatorError> {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline finishes")
            .expect("pipeline task panicked")
    }

    /// Wait until the collector holds at least `n` records
    async fn wait_for(collector: &CollectingEmitter, n: usize) {
        timeout(Duration::from_secs(5), async {
            while collector.records().len() < n {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("records emitted in time");
    }

    #[tokio::test]
    async fn test_active_window_then_drain() {
        // Test: A(t=0) + B(t=5) emitted on C(t=20); C emitted by the shutdown drain
        let layout = make_layout();
        let h = start(sum_by_src("A:10"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        h.tx.send(record(&layout, 1, 50, 5)).await.unwrap();
        h.tx.send(record(&layout, 1, 30, 20)).await.unwrap();
        h.tx.send(InputEvent::EndOfStream).await.unwrap();

        let summary = join(h.handle).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.drained, 1);

        let records = h.collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].count, 2);
        assert_eq!(records[0].get("BYTES"), Some(&FieldValue::Uint64(150)));
        assert_eq!(records[0].time_first, 0);
        assert_eq!(records[1].count, 1);
        assert_eq!(records[1].get("BYTES"), Some(&FieldValue::Uint64(30)));
        assert_eq!(records[1].time_first, 20_000);
        assert!(h.collector.is_finished());
    }

    #[tokio::test]
    async fn test_passive_eviction_driven_by_other_keys() {
        // Test: 10.0.0.1 goes idle; traffic from 10.0.0.2 moves the clock past its timeout
        let layout = make_layout();
        let h = start(sum_by_src("P:5"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        h.tx.send(record(&layout, 2, 10, 3)).await.unwrap();
        h.tx.send(record(&layout, 2, 10, 30)).await.unwrap();

        wait_for(&h.collector, 1).await;
        let evicted = h.collector.records();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].get("SRC_IP"), Some(&ip(1)));
        assert_eq!(evicted[0].get("BYTES"), Some(&FieldValue::Uint64(100)));

        h.tx.send(InputEvent::EndOfStream).await.unwrap();
        let summary = join(h.handle).await.unwrap();

        // Passive-only policy never splits 10.0.0.2 by window
        let records = h.collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("SRC_IP"), Some(&ip(2)));
        assert_eq!(records[1].count, 2);
        assert_eq!(summary.drained, 1);
    }

    #[tokio::test]
    async fn test_mixed_policy_reseeded_key_evicted_passively() {
        // Test: Active flush at t=20 reseeds 10.0.0.1; its old notification must not
        // evict the fresh window early, and passive timeout later evicts the reseed
        let layout = make_layout();
        let h = start(sum_by_src("M:10,5"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        h.tx.send(record(&layout, 1, 50, 5)).await.unwrap();
        h.tx.send(record(&layout, 1, 30, 20)).await.unwrap();

        wait_for(&h.collector, 1).await;
        // Several scan intervals with the clock at t=20
        sleep(Duration::from_millis(150)).await;

        let records = h.collector.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 2);
        assert_eq!(records[0].get("BYTES"), Some(&FieldValue::Uint64(150)));
        assert!(!records[0].continued);

        // Traffic from another key moves the clock past 20 + 5
        h.tx.send(record(&layout, 2, 10, 40)).await.unwrap();
        wait_for(&h.collector, 2).await;

        let records = h.collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("SRC_IP"), Some(&ip(1)));
        assert_eq!(records[1].count, 1);
        assert_eq!(records[1].get("BYTES"), Some(&FieldValue::Uint64(30)));
        assert_eq!(records[1].time_first, 20_000);
        assert!(records[1].continued);

        h.tx.send(InputEvent::EndOfStream).await.unwrap();
        let summary = join(h.handle).await.unwrap();

        let records = h.collector.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].get("SRC_IP"), Some(&ip(2)));
        assert_eq!(summary.drained, 1);
        assert_eq!(summary.emitted, 3);
    }

    #[tokio::test]
    async fn test_global_flush_empties_table_periodically() {
        let layout = make_layout();
        let h = start(sum_by_src("G:1"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        h.tx.send(record(&layout, 2, 200, 0)).await.unwrap();

        wait_for(&h.collector, 2).await;

        h.tx.send(InputEvent::EndOfStream).await.unwrap();
        let summary = join(h.handle).await.unwrap();

        assert_eq!(summary.drained, 0);
        assert_eq!(summary.emitted, 2);
        assert_eq!(h.collector.records().len(), 2);
    }

    #[tokio::test]
    async fn test_format_change_flushes_before_new_epoch() {
        // Test: Entries from the first layout are emitted before any record of the second
        let first = make_layout();
        let second = Arc::new(RecordLayout::new(vec![
            FieldSpec::new("TIME_FIRST", FieldType::Time),
            FieldSpec::new("SRC_IP", FieldType::Ip),
            FieldSpec::new("BYTES", FieldType::Uint64),
            FieldSpec::new("TIME_LAST", FieldType::Time),
        ]));
        let h = start(sum_by_src("A:300"));

        h.tx.send(InputEvent::FormatChanged(first.clone())).await.unwrap();
        h.tx.send(record(&first, 1, 100, 0)).await.unwrap();
        h.tx.send(record(&first, 2, 100, 1)).await.unwrap();
        h.tx.send(InputEvent::FormatChanged(second.clone())).await.unwrap();
        h.tx.send(record(&second, 1, 7, 2)).await.unwrap();
        h.tx.send(InputEvent::EndOfStream).await.unwrap();

        let summary = join(h.handle).await.unwrap();
        assert_eq!(summary.format_changes, 2);

        let records = h.collector.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].schema_version, records[1].schema_version);
        assert!(records[2].schema_version > records[0].schema_version);
        assert_eq!(records[2].get("BYTES"), Some(&FieldValue::Uint64(7)));
        assert_eq!(records[2].count, 1);
    }

    #[tokio::test]
    async fn test_drain_emits_every_key_once() {
        let layout = make_layout();
        let h = start(sum_by_src("A:300"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        for host in 1..=20u8 {
            h.tx.send(record(&layout, host, host as u64, 0)).await.unwrap();
            h.tx.send(record(&layout, host, 1, 1)).await.unwrap();
        }
        drop(h.tx);

        let summary = join(h.handle).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::ChannelClosed);
        assert_eq!(summary.drained, 20);

        let records = h.collector.records();
        assert_eq!(records.len(), 20);
        for host in 1..=20u8 {
            let matching: Vec<_> = records.iter().filter(|r| r.get("SRC_IP") == Some(&ip(host))).collect();
            assert_eq!(matching.len(), 1);
            assert_eq!(matching[0].count, 2);
        }
    }

    #[tokio::test]
    async fn test_stop_signal_drains_table() {
        let layout = make_layout();
        let h = start(sum_by_src("A:10"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        h.stop_tx.send(true).unwrap();

        let summary = join(h.handle).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert_eq!(h.collector.records().len(), 1);
        assert!(h.collector.is_finished());
    }

    #[tokio::test]
    async fn test_missing_field_is_fatal_after_drain() {
        // Test: A layout without BYTES fails the rebuild; earlier entries are still emitted
        let layout = make_layout();
        let broken = Arc::new(RecordLayout::new(vec![
            FieldSpec::new("SRC_IP", FieldType::Ip),
            FieldSpec::new("TIME_FIRST", FieldType::Time),
            FieldSpec::new("TIME_LAST", FieldType::Time),
        ]));
        let h = start(sum_by_src("A:10"));

        h.tx.send(InputEvent::FormatChanged(layout.clone())).await.unwrap();
        h.tx.send(record(&layout, 1, 100, 0)).await.unwrap();
        h.tx.send(InputEvent::FormatChanged(broken)).await.unwrap();

        let result = join(h.handle).await;
        assert!(matches!(result, Err(AggregatorError::Schema(_))));
        assert_eq!(h.collector.records().len(), 1);
        assert!(h.collector.is_finished());
    }
}
