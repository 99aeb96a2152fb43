use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::emit::{FrameRecord, RecordSink};

/// Writes one JSON object per line to stdout or an append-mode file.
/// Each record is flushed before `emit` returns.
pub struct NdjsonSink {
    target: String,
    out: Option<Box<dyn Write + Send>>,
}

impl NdjsonSink {
    /// `"-"` selects stdout; anything else is a file path opened for append.
    pub fn open(target: &str) -> Result<Self> {
        let out: Box<dyn Write + Send> = if target == "-" {
            Box::new(io::stdout())
        } else {
            let path = Path::new(target);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open NDJSON output {}", path.display()))?;
            Box::new(file)
        };
        Ok(Self::from_writer(target, out))
    }

    pub fn from_writer(target: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            target: target.into(),
            out: Some(out),
        }
    }
}

impl RecordSink for NdjsonSink {
    fn name(&self) -> &'static str {
        "ndjson"
    }

    fn emit(&mut self, record: &FrameRecord) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .with_context(|| format!("NDJSON sink {} is closed", self.target))?;
        let mut line = serde_json::to_vec(record).context("serialize frame record")?;
        line.push(b'\n');
        out.write_all(&line)
            .with_context(|| format!("write record to {}", self.target))?;
        out.flush()
            .with_context(|| format!("flush {}", self.target))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .with_context(|| format!("flush {}", self.target))?;
        }
        Ok(())
    }
}
