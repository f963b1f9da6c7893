// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured logging for the IGMP engines
//
// Entries carry a syslog severity and the facility (component) that
// produced them. Filtering happens in the Logger handle before an entry is
// built; sinks decide the output format.

mod consumer;
mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

// Public exports
pub use consumer::{LogSink, MemorySink, NullSink, StderrJsonSink, StderrSink};
pub use entry::{LogEntry, MAX_KVS};
pub use facility::Facility;
pub use logger::Logger;
pub use severity::Severity;
