//! Event sinks
//!
//! A sink receives one event per record: the record serialized verbatim and
//! the collection's sourcetype.

use std::sync::{Arc, Mutex};

pub mod jsonl;

pub use jsonl::JsonLinesSink;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for collected events
pub trait EventSink: Send {
    /// Write one event. `payload` is a serialized JSON document.
    fn write(&mut self, sourcetype: &str, payload: &[u8]) -> OutputResult<()>;

    /// Flush buffered events to their destination.
    fn flush(&mut self) -> OutputResult<()>;
}

/// One captured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Sourcetype label
    pub sourcetype: String,
    /// Serialized record
    pub payload: Vec<u8>,
}

impl Event {
    /// Payload parsed back into JSON
    pub fn record(&self) -> OutputResult<serde_json::Value> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| OutputError::SerializationError(e.to_string()))
    }
}

/// In-memory sink; clones share the same event list
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
    flushes: Arc<Mutex<u64>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the captured events
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of captured events
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of flush calls
    pub fn flushes(&self) -> u64 {
        self.flushes.lock().map(|n| *n).unwrap_or(0)
    }
}

impl EventSink for MemorySink {
    fn write(&mut self, sourcetype: &str, payload: &[u8]) -> OutputResult<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| OutputError::IoError(e.to_string()))?;
        events.push(Event {
            sourcetype: sourcetype.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        let mut flushes = self
            .flushes
            .lock()
            .map_err(|e| OutputError::FlushError(e.to_string()))?;
        *flushes += 1;
        Ok(())
    }
}
