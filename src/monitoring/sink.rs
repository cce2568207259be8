use std::sync::{Arc, Mutex};
use tracing::info;

/// Side channel for progress and hook output. Implementations must tolerate
/// arbitrary chunk boundaries.
pub trait LogSink: Send + Sync {
    fn write(&self, chunk: &[u8]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn write(&self, _chunk: &[u8]) {}
}

/// Emits each non-empty line as an info event tagged with `label`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl LogSink for TracingSink {
    fn write(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            info!(source = %self.label, "{}", line);
        }
    }
}

/// Collects everything written into memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl LogSink for MemorySink {
    fn write(&self, chunk: &[u8]) {
        self.buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(chunk);
    }
}
