//! JSONL record source with optional tail-follow and rotation detection
//!
//! Decodes each line and forwards the resulting events to the ingestion
//! channel. Without follow mode, end of file is end of stream.

use super::codec;
use crate::aggregator_core::record::{InputEvent, RecordLayout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

type LineReader = Box<dyn AsyncBufRead + Unpin + Send>;

pub struct JsonlSource {
    /// `None` reads stdin
    path: Option<PathBuf>,
    follow: bool,
    inode: Option<u64>,
    poll_interval: Duration,
    layout: Option<Arc<RecordLayout>>,
}

/// Counters reported when the source stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    pub forwarded: u64,
    pub skipped: u64,
}

impl JsonlSource {
    pub fn new(path: Option<PathBuf>, follow: bool) -> Self {
        Self {
            path,
            follow,
            inode: None,
            poll_interval: Duration::from_millis(100),
            layout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn open(&mut self) -> std::io::Result<LineReader> {
        let Some(path) = &self.path else {
            log::info!("📖 Reading records from stdin");
            return Ok(Box::new(BufReader::new(tokio::io::stdin())));
        };

        let file = File::open(path).await?;

        #[cfg(unix)]
        {
            self.inode = Some(file.metadata().await?.ino());
        }

        log::info!("📖 Reading records from: {}", path.display());
        Ok(Box::new(BufReader::new(file)))
    }

    /// Detect if the followed file has been rotated (inode changed)
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        #[cfg(unix)]
        {
            match tokio::fs::metadata(path).await {
                Ok(metadata) => Ok(self.inode.map_or(false, |old| old != metadata.ino())),
                // Rotated away and not yet recreated
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            Ok(false)
        }
    }

    /// Decode one complete line and forward it. Returns false when the
    /// source should stop (end of stream or channel closed).
    async fn forward_line(
        &mut self,
        raw: &[u8],
        tx: &mpsc::Sender<InputEvent>,
        stats: &mut SourceStats,
    ) -> bool {
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return true;
        }

        let event = match codec::decode_line(trimmed, self.layout.as_ref()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("⚠️  Skipping input line: {}", e);
                stats.skipped += 1;
                return true;
            }
        };

        if let InputEvent::FormatChanged(layout) = &event {
            self.layout = Some(layout.clone());
        }
        let end = matches!(event, InputEvent::EndOfStream);

        if tx.send(event).await.is_err() {
            log::warn!("⚠️  Ingestion channel closed, stopping source");
            return false;
        }
        stats.forwarded += 1;
        !end
    }

    /// Read until end of input (or stop), forwarding events to `tx`
    pub async fn run(
        mut self,
        tx: mpsc::Sender<InputEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> std::io::Result<SourceStats> {
        let mut reader = self.open().await?;
        let mut stats = SourceStats::default();
        // Bytes of the current line; survives cancelled reads and partial writes
        let mut line: Vec<u8> = Vec::new();
        let mut stop_open = true;

        loop {
            if *stop.borrow() {
                break;
            }

            let read = tokio::select! {
                changed = stop.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                    }
                    continue;
                }
                read = reader.read_until(b'\n', &mut line) => read?,
            };

            if read == 0 {
                if !self.follow || self.path.is_none() {
                    // Last line without a trailing newline
                    let pending = std::mem::take(&mut line);
                    if !self.forward_line(&pending, &tx, &mut stats).await {
                        break;
                    }
                    let _ = tx.send(InputEvent::EndOfStream).await;
                    break;
                }
                if self.detect_rotation().await? {
                    log::info!("🔄 File rotation detected, reopening input");
                    if !line.is_empty() {
                        log::warn!("⚠️  Dropping {} bytes of unterminated line from rotated file", line.len());
                        line.clear();
                    }
                    reader = self.open().await?;
                    continue;
                }
                sleep(self.poll_interval).await;
                continue;
            }

            // Partial line: wait for the rest
            if line.last() != Some(&b'\n') {
                continue;
            }

            let complete = std::mem::take(&mut line);
            if !self.forward_line(&complete, &tx, &mut stats).await {
                break;
            }
        }

        log::info!(
            "✅ Source finished ({} events forwarded, {} lines skipped)",
            stats.forwarded,
            stats.skipped
        );
        Ok(stats)
    }
}
