//! JSON Lines event sink
//!
//! Each event becomes one line:
//! `{"time":<epoch seconds>,"index":"...","sourcetype":"...","event":<record>}`.
//! The record is embedded as-is, without re-serialization.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use super::{EventSink, OutputError, OutputResult};

/// Default buffer size for output
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Event sink writing JSON Lines to any writer
pub struct JsonLinesSink<W: Write> {
    writer: BufWriter<W>,
    index: String,
    events_written: u64,
}

impl JsonLinesSink<std::fs::File> {
    /// Append to `path`, creating it and its parent directory.
    pub fn append_to<P: AsRef<Path>>(path: P, index: impl Into<String>) -> OutputResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OutputError::IoError(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                OutputError::IoError(format!("Failed to open {}: {e}", path.display()))
            })?;
        debug!(path = %path.display(), "Opened event file");
        Ok(Self::new(file, index))
    }
}

impl JsonLinesSink<std::io::Stdout> {
    /// Write to standard output.
    pub fn stdout(index: impl Into<String>) -> Self {
        Self::new(std::io::stdout(), index)
    }
}

impl<W: Write> JsonLinesSink<W> {
    /// Sink over `writer`, tagging events with `index`
    pub fn new(writer: W, index: impl Into<String>) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, writer),
            index: index.into(),
            events_written: 0,
        }
    }

    /// Events written so far
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Flush and return the inner writer.
    pub fn into_inner(self) -> OutputResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| OutputError::FlushError(e.to_string()))
    }

    fn envelope(&self, sourcetype: &str, payload: &[u8]) -> OutputResult<Vec<u8>> {
        let time = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let index = serde_json::to_string(&self.index)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        let sourcetype = serde_json::to_string(sourcetype)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;

        let mut line = Vec::with_capacity(payload.len() + index.len() + sourcetype.len() + 64);
        line.extend_from_slice(
            format!("{{\"time\":{time:.3},\"index\":{index},\"sourcetype\":{sourcetype},\"event\":")
                .as_bytes(),
        );
        line.extend_from_slice(payload);
        line.extend_from_slice(b"}\n");
        Ok(line)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn write(&mut self, sourcetype: &str, payload: &[u8]) -> OutputResult<()> {
        if payload.contains(&b'\n') {
            return Err(OutputError::SerializationError(
                "event payload spans multiple lines".to_string(),
            ));
        }
        let line = self.envelope(sourcetype, payload)?;
        self.writer
            .write_all(&line)
            .map_err(|e| OutputError::IoError(e.to_string()))?;
        self.events_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(e.to_string()))
    }
}
