//! Runtime configuration from environment variables

use crate::emitter::RetryPolicy;
use std::env;
use std::time::Duration;

/// Tuning knobs for the aggregation runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Ingestion channel buffer size (events)
    pub channel_buffer: usize,

    /// Receive wait before re-checking the stop signal
    pub recv_timeout_ms: u64,

    /// Send attempts per aggregate during normal operation
    pub send_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt)
    pub retry_backoff_ms: u64,

    /// Passive timeout scan period in milliseconds
    pub scan_interval_ms: u64,

    /// Write an end-of-stream marker after the final drain
    pub forward_eos: bool,

    /// Throughput log period in seconds
    pub stats_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 10_000,
            recv_timeout_ms: 500,
            send_retries: 3,
            retry_backoff_ms: 100,
            scan_interval_ms: 1_000,
            forward_eos: true,
            stats_interval_secs: 10,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLOWAGG_CHANNEL_BUFFER` (default: 10000)
    /// - `FLOWAGG_RECV_TIMEOUT_MS` (default: 500)
    /// - `FLOWAGG_SEND_RETRIES` (default: 3)
    /// - `FLOWAGG_RETRY_BACKOFF_MS` (default: 100)
    /// - `FLOWAGG_SCAN_INTERVAL_MS` (default: 1000)
    /// - `FLOWAGG_FORWARD_EOS` (default: true)
    /// - `FLOWAGG_STATS_INTERVAL_SECS` (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            channel_buffer: env_or("FLOWAGG_CHANNEL_BUFFER", defaults.channel_buffer).max(1),
            recv_timeout_ms: env_or("FLOWAGG_RECV_TIMEOUT_MS", defaults.recv_timeout_ms).max(1),
            send_retries: env_or("FLOWAGG_SEND_RETRIES", defaults.send_retries).max(1),
            retry_backoff_ms: env_or("FLOWAGG_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            scan_interval_ms: env_or("FLOWAGG_SCAN_INTERVAL_MS", defaults.scan_interval_ms).max(1),
            forward_eos: env_or("FLOWAGG_FORWARD_EOS", defaults.forward_eos),
            stats_interval_secs: env_or("FLOWAGG_STATS_INTERVAL_SECS", defaults.stats_interval_secs).max(1),
        }
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.send_retries,
            initial_backoff_ms: self.retry_backoff_ms,
            max_backoff_ms: self.retry_backoff_ms.saturating_mul(8),
        }
    }

    /// Print configuration summary
    pub fn print(&self) {
        log::info!("⚙️  Runtime configuration:");
        log::info!("   ├─ Channel buffer: {}", self.channel_buffer);
        log::info!("   ├─ Receive timeout: {}ms", self.recv_timeout_ms);
        log::info!("   ├─ Send retries: {} (backoff {}ms)", self.send_retries, self.retry_backoff_ms);
        log::info!("   ├─ Passive scan interval: {}ms", self.scan_interval_ms);
        log::info!("   └─ Forward EOS: {}", self.forward_eos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.channel_buffer, 10_000);
        assert_eq!(config.recv_timeout(), Duration::from_millis(500));
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert!(config.forward_eos);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        env::set_var("FLOWAGG_CHANNEL_BUFFER", "64");
        env::set_var("FLOWAGG_SEND_RETRIES", "0");
        env::set_var("FLOWAGG_FORWARD_EOS", "false");
        env::set_var("FLOWAGG_SCAN_INTERVAL_MS", "not-a-number");

        let config = RuntimeConfig::from_env();

        assert_eq!(config.channel_buffer, 64);
        assert_eq!(config.send_retries, 1);
        assert!(!config.forward_eos);
        assert_eq!(config.scan_interval_ms, 1_000);

        // Cleanup
        env::remove_var("FLOWAGG_CHANNEL_BUFFER");
        env::remove_var("FLOWAGG_SEND_RETRIES");
        env::remove_var("FLOWAGG_FORWARD_EOS");
        env::remove_var("FLOWAGG_SCAN_INTERVAL_MS");
    }

    #[test]
    fn test_zero_stats_interval_clamped() {
        env::set_var("FLOWAGG_STATS_INTERVAL_SECS", "0");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.stats_interval_secs, 1);
        env::remove_var("FLOWAGG_STATS_INTERVAL_SECS");
    }
}
