// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for igmpd.
//!
//! JSON5 configuration format. Every field has a default, so `{}` is a
//! valid configuration. Intervals are given in seconds; intervals that
//! RFC 2236 derives from other parameters are derived when omitted.
//!
//! ## Defaults (RFC 2236, Section 8)
//!
//! | Parameter | Default |
//! |-----------|---------|
//! | Robustness Variable | 2 |
//! | Query Interval | 125s |
//! | Query Response Interval | 10s |
//! | Group Membership Interval | RV * QI + QRI (260s) |
//! | Other Querier Present Interval | RV * QI + QRI / 2 (255s) |
//! | Startup Query Interval | QI / 4 (31.25s) |
//! | Startup Query Count | RV |
//! | Last Member Query Interval | 1s |
//! | Last Member Query Count | RV |
//! | Unsolicited Report Interval | 10s |

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::InterfaceId;

pub const DEFAULT_ROBUSTNESS_VARIABLE: u32 = 2;
pub const DEFAULT_QUERY_INTERVAL: f64 = 125.0;
pub const DEFAULT_QUERY_RESPONSE_INTERVAL: f64 = 10.0;
pub const DEFAULT_LAST_MEMBER_QUERY_INTERVAL: f64 = 1.0;
pub const DEFAULT_UNSOLICITED_REPORT_INTERVAL: f64 = 10.0;

/// Largest max response time the 8-bit wire field can carry (255 tenths)
pub const MAX_RESPONSE_TIME_SECS: f64 = 25.5;

/// Upper bound for any configured or derived interval (one year)
///
/// Deadlines are computed as `Instant + interval`, which panics on overflow.
pub const MAX_INTERVAL_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Compute Group Membership Interval (GMI)
/// GMI = (Robustness Variable * Query Interval) + Query Response Interval
pub fn group_membership_interval(
    robustness: u32,
    query_interval: Duration,
    query_response: Duration,
) -> Duration {
    query_interval
        .saturating_mul(robustness)
        .saturating_add(query_response)
}

/// Compute Other Querier Present Interval
/// OQPI = (Robustness Variable * Query Interval) + (Query Response Interval / 2)
pub fn other_querier_present_interval(
    robustness: u32,
    query_interval: Duration,
    query_response: Duration,
) -> Duration {
    query_interval
        .saturating_mul(robustness)
        .saturating_add(query_response / 2)
}

/// Startup/running configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Administrative switch; when false all traffic is dropped
    pub enabled: bool,

    /// Whether this node routes multicast (runs the router engines)
    pub multicast_forwarding: bool,

    /// Robustness Variable: tuning for expected packet loss
    pub robustness_variable: u32,

    /// Time between General Queries sent by the querier
    pub query_interval: f64,

    /// Max response time advertised in General Queries
    pub query_response_interval: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_membership_interval: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_querier_present_interval: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_query_interval: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_query_count: Option<u32>,

    /// Max response time of last-member queries, and their spacing
    pub last_member_query_interval: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_member_query_count: Option<u32>,

    /// Upper bound of the random delay before a host repeats its first report
    pub unsolicited_report_interval: f64,

    /// Interfaces for the in-memory registry used by `igmpd run`
    pub interfaces: Vec<InterfaceSpec>,
}

/// Interface as stored in config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceSpec {
    /// Network interface name
    pub name: String,

    /// Interface IPv4 address, used for querier election
    pub address: Ipv4Addr,

    /// Optional explicit interface index (defaults to position + 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    #[serde(default)]
    pub loopback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_forwarding: false,
            robustness_variable: DEFAULT_ROBUSTNESS_VARIABLE,
            query_interval: DEFAULT_QUERY_INTERVAL,
            query_response_interval: DEFAULT_QUERY_RESPONSE_INTERVAL,
            group_membership_interval: None,
            other_querier_present_interval: None,
            startup_query_interval: None,
            startup_query_count: None,
            last_member_query_interval: DEFAULT_LAST_MEMBER_QUERY_INTERVAL,
            last_member_query_count: None,
            unsolicited_report_interval: DEFAULT_UNSOLICITED_REPORT_INTERVAL,
            interfaces: Vec::new(),
        }
    }
}

/// Resolved protocol timing, as consumed by the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgmpTimers {
    pub robustness_variable: u32,
    pub query_interval: Duration,
    pub query_response_interval: Duration,
    pub group_membership_interval: Duration,
    pub other_querier_present_interval: Duration,
    pub startup_query_interval: Duration,
    pub startup_query_count: u32,
    pub last_member_query_interval: Duration,
    pub last_member_query_count: u32,
    pub unsolicited_report_interval: Duration,
}

impl Default for IgmpTimers {
    fn default() -> Self {
        Config::default().timers()
    }
}

impl IgmpTimers {
    /// Membership timeout used after a Leave while we are the querier
    pub fn last_member_query_time(&self) -> Duration {
        self.last_member_query_interval * self.last_member_query_count
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to JSON5 string (with pretty formatting)
    pub fn to_json5(&self) -> String {
        // JSON is valid JSON5; json5 has no pretty printer of its own
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    pub fn effective_group_membership_interval(&self) -> f64 {
        self.group_membership_interval.unwrap_or(
            self.robustness_variable as f64 * self.query_interval + self.query_response_interval,
        )
    }

    pub fn effective_other_querier_present_interval(&self) -> f64 {
        self.other_querier_present_interval.unwrap_or(
            self.robustness_variable as f64 * self.query_interval
                + self.query_response_interval / 2.0,
        )
    }

    pub fn effective_startup_query_interval(&self) -> f64 {
        self.startup_query_interval
            .unwrap_or(self.query_interval / 4.0)
    }

    pub fn effective_startup_query_count(&self) -> u32 {
        self.startup_query_count.unwrap_or(self.robustness_variable)
    }

    pub fn effective_last_member_query_count(&self) -> u32 {
        self.last_member_query_count
            .unwrap_or(self.robustness_variable)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.robustness_variable == 0 {
            return Err(ConfigError::InvalidCount {
                name: "robustness_variable",
            });
        }

        let intervals = [
            ("query_interval", self.query_interval),
            ("query_response_interval", self.query_response_interval),
            (
                "group_membership_interval",
                self.effective_group_membership_interval(),
            ),
            (
                "other_querier_present_interval",
                self.effective_other_querier_present_interval(),
            ),
            (
                "startup_query_interval",
                self.effective_startup_query_interval(),
            ),
            ("last_member_query_interval", self.last_member_query_interval),
            ("unsolicited_report_interval", self.unsolicited_report_interval),
        ];
        for (name, value) in intervals {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidInterval {
                    name,
                    value,
                    reason: "must be a positive number of seconds",
                });
            }
            if value > MAX_INTERVAL_SECS || Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::InvalidInterval {
                    name,
                    value,
                    reason: "must not exceed one year (31536000s)",
                });
            }
        }

        // Both are advertised in the 8-bit Max Resp Time field
        for (name, value) in [
            ("query_response_interval", self.query_response_interval),
            ("last_member_query_interval", self.last_member_query_interval),
        ] {
            if value > MAX_RESPONSE_TIME_SECS {
                return Err(ConfigError::InvalidInterval {
                    name,
                    value,
                    reason: "does not fit the 8-bit max response time field (max 25.5s)",
                });
            }
        }

        if self.query_response_interval >= self.query_interval {
            return Err(ConfigError::InvalidInterval {
                name: "query_response_interval",
                value: self.query_response_interval,
                reason: "must be less than query_interval",
            });
        }

        if self.effective_startup_query_count() == 0 {
            return Err(ConfigError::InvalidCount {
                name: "startup_query_count",
            });
        }
        if self.effective_last_member_query_count() == 0 {
            return Err(ConfigError::InvalidCount {
                name: "last_member_query_count",
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for spec in &self.interfaces {
            validate_interface_name(&spec.name)?;
        }
        for id in self.interface_ids() {
            if !seen_ids.insert(id) {
                return Err(ConfigError::DuplicateInterface { id: id.0 });
            }
        }

        Ok(())
    }

    /// Interface ids in declaration order (explicit or position + 1)
    pub fn interface_ids(&self) -> Vec<InterfaceId> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(idx, spec)| InterfaceId(spec.id.unwrap_or(idx as u32 + 1)))
            .collect()
    }

    /// Resolve into the `Duration`-based timing used by the engines
    ///
    /// Call [`Config::validate`] first; invalid values are not re-checked.
    pub fn timers(&self) -> IgmpTimers {
        let secs = |value: f64| {
            Duration::try_from_secs_f64(value.clamp(0.0, MAX_INTERVAL_SECS))
                .unwrap_or(Duration::ZERO)
        };
        let query_interval = secs(self.query_interval);
        let query_response_interval = secs(self.query_response_interval);

        IgmpTimers {
            robustness_variable: self.robustness_variable,
            query_interval,
            query_response_interval,
            group_membership_interval: self
                .group_membership_interval
                .map(secs)
                .unwrap_or_else(|| {
                    group_membership_interval(
                        self.robustness_variable,
                        query_interval,
                        query_response_interval,
                    )
                }),
            other_querier_present_interval: self
                .other_querier_present_interval
                .map(secs)
                .unwrap_or_else(|| {
                    other_querier_present_interval(
                        self.robustness_variable,
                        query_interval,
                        query_response_interval,
                    )
                }),
            startup_query_interval: secs(self.effective_startup_query_interval()),
            startup_query_count: self.effective_startup_query_count(),
            last_member_query_interval: secs(self.last_member_query_interval),
            last_member_query_count: self.effective_last_member_query_count(),
            unsolicited_report_interval: secs(self.unsolicited_report_interval),
        }
    }
}

/// Validate an interface name
fn validate_interface_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot be empty".to_string(),
        });
    }
    if name.len() > 15 {
        // Linux IFNAMSIZ limit
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name too long (max 15 chars)".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name contains invalid characters".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid {name} = {value}: {reason}")]
    InvalidInterval {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("{name} must be at least 1")]
    InvalidCount { name: &'static str },

    #[error("invalid interface name '{name}': {reason}")]
    InvalidInterfaceName { name: String, reason: String },

    #[error("interface id {id} is used more than once")]
    DuplicateInterface { id: u32 },
}
