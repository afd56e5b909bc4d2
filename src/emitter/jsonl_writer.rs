//! JSONL backend - one aggregate per line, to a file or stdout

use super::{EmitError, RecordEmitter};
use crate::aggregator_core::output::OutputRecord;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

struct Sink {
    writer: BufWriter<Box<dyn Write + Send>>,
    last_flush: Instant,
}

pub struct JsonlEmitter {
    sink: Mutex<Sink>,
    forward_eos: bool,
}

impl JsonlEmitter {
    pub fn to_file(path: &Path, forward_eos: bool) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("📝 Writing aggregates to: {}", path.display());
        Ok(Self::from_writer(Box::new(file), forward_eos))
    }

    pub fn to_stdout(forward_eos: bool) -> Self {
        log::info!("📝 Writing aggregates to stdout");
        Self::from_writer(Box::new(std::io::stdout()), forward_eos)
    }

    pub fn from_writer(writer: Box<dyn Write + Send>, forward_eos: bool) -> Self {
        Self {
            sink: Mutex::new(Sink {
                writer: BufWriter::new(writer),
                last_flush: Instant::now(),
            }),
            forward_eos,
        }
    }

    fn sink(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordEmitter for JsonlEmitter {
    async fn send(&self, record: &OutputRecord) -> Result<(), EmitError> {
        let json = serde_json::to_string(record)?;
        let mut sink = self.sink();
        writeln!(sink.writer, "{}", json)?;

        // Flush every 5 seconds
        if sink.last_flush.elapsed() > FLUSH_INTERVAL {
            sink.writer.flush()?;
            sink.last_flush = Instant::now();
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        let mut sink = self.sink();
        sink.writer.flush()?;
        sink.last_flush = Instant::now();
        Ok(())
    }

    async fn finish(&self) -> Result<(), EmitError> {
        let mut sink = self.sink();
        if self.forward_eos {
            writeln!(sink.writer, "{}", serde_json::json!({ "eos": true }))?;
        }
        sink.writer.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

impl Drop for JsonlEmitter {
    fn drop(&mut self) {
        let _ = self.sink().writer.flush();
    }
}
