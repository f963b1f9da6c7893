// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle with global and per-facility level filtering

use super::consumer::{LogSink, MemorySink, NullSink, StderrJsonSink, StderrSink};
use super::entry::LogEntry;
use super::{Facility, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// The sink and the level table are shared via Arc, so changing a level on
/// one clone affects all of them.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels
    facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("global_min_level", &self.global_level())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Create a logger writing to an arbitrary sink at Info level
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Human-readable lines on stderr
    pub fn stderr() -> Self {
        Self::new(Arc::new(StderrSink))
    }

    /// One JSON object per line on stderr
    pub fn stderr_json() -> Self {
        Self::new(Arc::new(StderrJsonSink))
    }

    /// A logger that drops everything
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// A Debug-level logger and the sink capturing its output
    pub fn memory() -> (Self, MemorySink) {
        let sink = MemorySink::new();
        let logger = Self::new(Arc::new(sink.clone()));
        logger.set_global_level(Severity::Debug);
        (logger, sink)
    }

    /// Check if a log message should be written based on severity filtering
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        // Facility-specific level, if set, overrides global
        let facility_level = match self.facility_min_levels.read() {
            Ok(levels) => levels.get(&facility).copied(),
            Err(poisoned) => poisoned.into_inner().get(&facility).copied(),
        };
        if let Some(min_level) = facility_level {
            return severity <= min_level;
        }

        let global_min = self.global_min_level.load(Ordering::Relaxed);
        (severity as u8) <= global_min
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.sink
            .write_entry(&LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value pairs
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }

        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.sink.write_entry(&entry);
    }

    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Current global minimum log level
    pub fn global_level(&self) -> Severity {
        Severity::from_u8(self.global_min_level.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        match self.facility_min_levels.write() {
            Ok(mut levels) => levels.insert(facility, level),
            Err(poisoned) => poisoned.into_inner().insert(facility, level),
        };
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        match self.facility_min_levels.write() {
            Ok(mut levels) => levels.remove(&facility),
            Err(poisoned) => poisoned.into_inner().remove(&facility),
        };
    }
}
