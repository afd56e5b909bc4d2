//! flowagg - Flow Record Aggregator
//!
//! Reads JSONL flow records, aggregates them by key and writes one record per
//! aggregate when its timeout fires or the input ends.
//!
//! ## Usage
//!
//! ```bash
//! flowagg -k SRC_IP -k DST_IP -s BYTES -s PACKETS -t M:60,10 --input flows.jsonl
//! ```
//!
//! ## Environment Variables
//!
//! - FLOWAGG_CHANNEL_BUFFER - Input channel capacity (default: 10000)
//! - FLOWAGG_RECV_TIMEOUT_MS - Ingestion receive wait (default: 500)
//! - FLOWAGG_SEND_RETRIES - Output attempts per aggregate (default: 3)
//! - FLOWAGG_RETRY_BACKOFF_MS - Initial retry backoff (default: 100)
//! - FLOWAGG_SCAN_INTERVAL_MS - Passive timeout scan period (default: 1000)
//! - FLOWAGG_FORWARD_EOS - Write an EOS marker after the final drain (default: true)
//! - FLOWAGG_STATS_INTERVAL_SECS - Throughput log period (default: 10)
//! - RUST_LOG - Logging level (optional, default: info)

use dotenv::dotenv;
use flowagg::cli::Cli;
use flowagg::emitter::open_emitter;
use flowagg::error::AggregatorError;
use flowagg::pipeline::{run_pipeline, RuntimeConfig, StopReason};
use flowagg::source::JsonlSource;
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("❌ flowagg failed: {}", e);
            1
        }
    };

    // A blocking stdin read cannot be cancelled; do not wait for it
    std::process::exit(code);
}

async fn run() -> Result<(), AggregatorError> {
    let (cli, rules) = Cli::parse_ordered();
    let config = RuntimeConfig::from_env();

    info!("🚀 Starting flowagg");
    config.print();
    rules.print();

    let emitter = open_emitter(cli.backend, cli.output.clone(), config.forward_eos)?;

    let (tx, rx) = mpsc::channel(config.channel_buffer);
    let (stop_tx, stop_rx) = watch::channel(false);

    let source = JsonlSource::new(cli.input.clone(), cli.follow);
    let source_stop = stop_rx.clone();
    let source_handle = tokio::spawn(source.run(tx, source_stop));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("⚠️  Received CTRL+C, shutting down...");
                let _ = stop_tx.send(true);
            }
            Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
        }
    });

    let summary = run_pipeline(rx, rules, emitter, &config, stop_rx).await?;
    summary.print();

    // A failed source closes the channel; report it as fatal
    if summary.stop_reason == StopReason::ChannelClosed || source_handle.is_finished() {
        match source_handle.await {
            Ok(Ok(stats)) => info!("📖 Input lines skipped: {}", stats.skipped),
            Ok(Err(e)) => return Err(AggregatorError::Io(e)),
            Err(e) => return Err(AggregatorError::Io(std::io::Error::other(e))),
        }
    }

    info!("✅ flowagg stopped");
    Ok(())
}
