// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    // === Protocol engines ===
    /// Host membership state machines (reports, leaves)
    Host = 0,
    /// Router membership state machines (member presence)
    Router = 1,
    /// Querier election and General Queries
    Querier = 2,

    // === Node plumbing ===
    /// Inbound decode and routing to the engines
    Dispatcher = 4,
    /// Timer scheduling and expiry
    Timers = 5,
    /// Configuration loading and validation
    Config = 6,
    /// Real-time tokio driver
    Runtime = 7,
    /// Virtual link simulation
    Simulation = 8,

    // === Testing and Utilities ===
    /// Test harness and fixtures
    Test = 12,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Every facility with its own filtering level
    pub const ALL: [Facility; 9] = [
        Facility::Host,
        Facility::Router,
        Facility::Querier,
        Facility::Dispatcher,
        Facility::Timers,
        Facility::Config,
        Facility::Runtime,
        Facility::Simulation,
        Facility::Test,
    ];

    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Host => "Host",
            Facility::Router => "Router",
            Facility::Querier => "Querier",
            Facility::Dispatcher => "Dispatcher",
            Facility::Timers => "Timers",
            Facility::Config => "Config",
            Facility::Runtime => "Runtime",
            Facility::Simulation => "Simulation",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Host,
            1 => Facility::Router,
            2 => Facility::Querier,
            4 => Facility::Dispatcher,
            5 => Facility::Timers,
            6 => Facility::Config,
            7 => Facility::Runtime,
            8 => Facility::Simulation,
            12 => Facility::Test,
            _ => Facility::Unknown,
        }
    }

    /// Look up a facility by its display name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|facility| facility.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_from_u8() {
        for facility in Facility::ALL {
            assert_eq!(Facility::from_u8(facility.as_u8()), facility);
        }
        assert_eq!(Facility::from_u8(255), Facility::Unknown);
        assert_eq!(Facility::from_u8(99), Facility::Unknown);
    }

    #[test]
    fn test_facility_display() {
        assert_eq!(format!("{}", Facility::Querier), "Querier");
        assert_eq!(format!("{}", Facility::Dispatcher), "Dispatcher");
    }

    #[test]
    fn test_facility_from_name() {
        assert_eq!(Facility::from_name("router"), Some(Facility::Router));
        assert_eq!(Facility::from_name("Timers"), Some(Facility::Timers));
        assert_eq!(Facility::from_name("ingress"), None);
    }
}
