//! Deployment log capture
//!
//! Everything written here is reported to the control plane as the
//! deployment's log text. Operator diagnostics go through `tracing`
//! instead; secrets must never reach either.

use std::sync::Mutex;

/// Append-only log text for one deployment attempt
#[derive(Debug, Default)]
pub struct LogBook {
    text: Mutex<String>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line; a trailing newline is added
    pub fn line(&self, line: impl AsRef<str>) {
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        text.push_str(line.as_ref());
        text.push('\n');
    }

    /// Append raw text verbatim
    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        text.push_str(chunk);
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Length in bytes; usable as an offset into later snapshots
    pub fn len(&self) -> usize {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}
