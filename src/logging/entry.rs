// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use super::{Facility, Severity};
use chrono::{DateTime, Utc};

/// Maximum number of key-value pairs kept per entry
pub const MAX_KVS: usize = 4;

/// One log record as handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    pub kvs: Vec<(String, String)>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current wall clock
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Add a key-value pair; extra pairs beyond `MAX_KVS` are dropped
    pub fn add_kv(&mut self, key: &str, value: &str) {
        if self.kvs.len() < MAX_KVS {
            self.kvs.push((key.to_string(), value.to_string()));
        }
    }

    /// Render as `[SEVERITY] [Facility] message key=value ...`
    pub fn to_text(&self) -> String {
        let mut line = format!("[{}] [{}] {}", self.severity, self.facility, self.message);
        for (key, value) in &self.kvs {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line
    }

    /// Render as a single-line JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.severity.as_str(),
            "facility": self.facility.as_str(),
            "message": self.message,
        });
        if let Some(map) = object.as_object_mut() {
            for (key, value) in &self.kvs {
                map.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
        object
    }
}
