//! Record sinks

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::record::{to_json_line, Record};
use crate::utils::Result;

pub const SOURCE_HOT_BIG_KEYS: &str = "redis/hot-big-keys";
pub const SOURCE_TOPOLOGY: &str = "redis/topology";

/// Destination for records
///
/// Shared by every worker thread of every deployment.
pub trait MetricSink: Send + Sync {
    fn feed(&self, source: &str, records: Vec<Record>, cost: Duration) -> Result<()>;
}

/// Logs each record as a JSON object
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn feed(&self, source: &str, records: Vec<Record>, cost: Duration) -> Result<()> {
        info!(
            "{} records from {} (cost {:.1}ms)",
            records.len(),
            source,
            cost.as_secs_f64() * 1000.0
        );
        for record in &records {
            info!(target: "records", "{}", to_json_line(source, record, cost));
        }
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Append to a file, creating it if needed
    pub fn file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }
}

impl MetricSink for JsonLinesSink {
    fn feed(&self, source: &str, records: Vec<Record>, cost: Duration) -> Result<()> {
        let mut out = self.out.lock();
        for record in &records {
            serde_json::to_writer(&mut *out, &to_json_line(source, record, cost))
                .map_err(io::Error::from)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Keeps every batch in memory
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(String, Vec<Record>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, source: &str) -> Vec<Record> {
        self.batches
            .lock()
            .iter()
            .filter(|(s, _)| s == source)
            .flat_map(|(_, r)| r.iter().cloned())
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl MetricSink for MemorySink {
    fn feed(&self, source: &str, records: Vec<Record>, _cost: Duration) -> Result<()> {
        self.batches.lock().push((source.to_string(), records));
        Ok(())
    }
}
