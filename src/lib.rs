// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv2 group membership for hosts and routers (RFC 2236).
//!
//! The crate holds three cooperating state machines that share one wire
//! protocol:
//!
//! - **Host membership** ([`protocols::host`]): one machine per
//!   (interface, group) deciding when to send Reports and Leaves.
//! - **Router membership** ([`protocols::router`]): one machine per
//!   (interface, group) tracking whether members are present on a link.
//! - **Querier** ([`protocols::querier`]): one machine per interface
//!   electing the active querier and emitting General Queries.
//!
//! [`node::IgmpNode`] wires them together behind a message dispatcher, a
//! virtual-time [`node::timer_manager::TimerQueue`], an
//! [`registry::InterfaceRegistry`] and an outbound notification bus.
//! [`lan::Lan`] connects several nodes on one simulated link and
//! [`runtime::NodeRuntime`] drives a single node in real time on tokio.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub mod config;
pub mod error;
pub mod lan;
pub mod logging;
pub mod node;
pub mod protocols;
pub mod registry;
pub mod runtime;
pub mod stats;

pub use config::{Config, ConfigError, IgmpTimers};
pub use error::{Error, Result};
pub use node::IgmpNode;

/// Identifier of a network interface, stable for the interface's lifetime
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// A multicast group address (224.0.0.0/4)
///
/// Construction checks the address is multicast, so every `GroupAddress`
/// in the crate is a valid group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "Ipv4Addr", into = "Ipv4Addr")]
pub struct GroupAddress(Ipv4Addr);

impl GroupAddress {
    /// All-systems group (224.0.0.1), destination of General Queries
    pub const ALL_HOSTS: GroupAddress = GroupAddress(Ipv4Addr::new(224, 0, 0, 1));

    /// All-routers group (224.0.0.2), destination of Leave messages
    pub const ALL_ROUTERS: GroupAddress = GroupAddress(Ipv4Addr::new(224, 0, 0, 2));

    /// Wrap an address, returning `None` if it is not multicast
    pub fn new(addr: Ipv4Addr) -> Option<Self> {
        addr.is_multicast().then_some(Self(addr))
    }

    /// The underlying IPv4 address
    pub const fn addr(self) -> Ipv4Addr {
        self.0
    }

    /// All-hosts and all-routers never take part in membership tracking
    pub fn is_reserved(self) -> bool {
        self == Self::ALL_HOSTS || self == Self::ALL_ROUTERS
    }
}

impl TryFrom<Ipv4Addr> for GroupAddress {
    type Error = Error;

    fn try_from(addr: Ipv4Addr) -> Result<Self> {
        Self::new(addr).ok_or(Error::NotMulticast(addr))
    }
}

impl From<GroupAddress> for Ipv4Addr {
    fn from(group: GroupAddress) -> Self {
        group.0
    }
}

impl FromStr for GroupAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr: Ipv4Addr = s
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        Self::try_from(addr)
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Router-side membership changes published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipNotification {
    /// First member of a group appeared on an interface
    GroupRegistered {
        interface: InterfaceId,
        group: GroupAddress,
    },
    /// Last member of a group timed out on an interface
    GroupUnregistered {
        interface: InterfaceId,
        group: GroupAddress,
    },
}

impl MembershipNotification {
    pub fn interface(&self) -> InterfaceId {
        match self {
            Self::GroupRegistered { interface, .. } | Self::GroupUnregistered { interface, .. } => {
                *interface
            }
        }
    }

    pub fn group(&self) -> GroupAddress {
        match self {
            Self::GroupRegistered { group, .. } | Self::GroupUnregistered { group, .. } => *group,
        }
    }
}

/// Events consumed from the interface table and the host's socket layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEvent {
    /// A new interface appeared in the registry
    InterfaceCreated(InterfaceId),
    /// An interface was removed; all state keyed by it must go
    InterfaceDeleted(InterfaceId),
    /// A local application joined a group
    GroupJoined {
        interface: InterfaceId,
        group: GroupAddress,
    },
    /// A local application left a group
    GroupLeft {
        interface: InterfaceId,
        group: GroupAddress,
    },
}
