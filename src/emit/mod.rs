//! Per-frame record emission.
//!
//! The orchestrator builds one `FrameRecord` per frame and hands it to a
//! `RecordSink`. Sinks:
//! - `NdjsonSink`: stdout or append-mode file, one JSON object per line
//! - `MqttSink` (feature: sink-mqtt): QoS 1 publish per record

#[cfg(feature = "sink-mqtt")]
mod mqtt;
mod ndjson;
mod record;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

#[cfg(feature = "sink-mqtt")]
pub use mqtt::{MqttSink, MqttSinkConfig, DEFAULT_TOPIC_PREFIX};
pub use ndjson::NdjsonSink;
pub use record::{
    new_run_id, DetectionEntry, FrameRecord, RecordContext, SourceInfo, DEFAULT_SCHEMA_VERSION,
};

/// Destination for frame records.
pub trait RecordSink {
    fn name(&self) -> &'static str;

    fn emit(&mut self, record: &FrameRecord) -> Result<()>;

    /// Flush and release the destination. Called once at the end of a run.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects records in memory. Clones share the same buffer, so a caller can
/// keep one handle while the orchestrator owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<FrameRecord>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FrameRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn emit(&mut self, record: &FrameRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
