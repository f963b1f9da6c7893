// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log sinks - where finished log entries go

use super::entry::LogEntry;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Output sink for log entries
pub trait LogSink: Send + Sync {
    /// Write a log entry to the sink
    fn write_entry(&self, entry: &LogEntry);
}

/// Standard error sink, one human-readable line per entry
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_entry(&self, entry: &LogEntry) {
        let _ = writeln!(std::io::stderr().lock(), "{}", entry.to_text());
    }
}

/// Standard error sink, one JSON object per line
#[derive(Debug, Default)]
pub struct StderrJsonSink;

impl LogSink for StderrJsonSink {
    fn write_entry(&self, entry: &LogEntry) {
        // No flush() - let stderr buffer naturally
        let _ = writeln!(std::io::stderr().lock(), "{}", entry.to_json());
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write_entry(&self, _entry: &LogEntry) {}
}

/// Keeps entries in memory so tests can assert on them
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether any entry's message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn write_entry(&self, entry: &LogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry.clone()),
            Err(poisoned) => poisoned.into_inner().push(entry.clone()),
        }
    }
}
