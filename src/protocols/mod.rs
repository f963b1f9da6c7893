// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv2 state machines and wire format
//!
//! This module contains the three state machines that make up an IGMP
//! speaker, plus the message codec they share:
//!
//! - **Host membership** (`host`): per (interface, group), decides when a
//!   host sends Reports and Leaves
//! - **Router membership** (`router`): per (interface, group), tracks
//!   whether members are present on the link
//! - **Querier** (`querier`): per interface, elects the querier and drives
//!   General Queries
//!
//! ## Architecture
//!
//! Engines never touch the network, the registry or the timer queue
//! directly. Each operation mutates the engine's own records and returns an
//! [`Actions`](crate::node::actions::Actions) value describing the side
//! effects; the node applies them. Timers are identified by a
//! [`TimerKind`] value rather than a pointer to the record, so a timer that
//! outlives its record is detected by lookup instead of dereferenced.
//!
//! ## Message Flow
//!
//! | Message | Host engine | Router engines |
//! |---------|-------------|----------------|
//! | Query (general) | all groups on interface | querier election |
//! | Query (group-specific) | matching group only | querier election |
//! | V2 Report | report suppression | member present |
//! | Leave | - | last-member check |

pub mod host;
pub mod message;
pub mod querier;
pub mod router;

use std::time::Instant;

use crate::{GroupAddress, InterfaceId};

/// Identity of a protocol timer
///
/// Each record owns at most one timer of each kind, so the kind doubles as
/// the key the firing handler uses to find its record again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Querier: periodic General Query / other-querier-present timer
    GeneralQuery { interface: InterfaceId },
    /// Host: delayed Report for a group
    HostResponse {
        interface: InterfaceId,
        group: GroupAddress,
    },
    /// Router: group membership timeout
    MembershipExpiry {
        interface: InterfaceId,
        group: GroupAddress,
    },
    /// Router: last-member query retransmission
    Retransmit {
        interface: InterfaceId,
        group: GroupAddress,
    },
}

impl TimerKind {
    /// Interface the timer belongs to
    pub fn interface(&self) -> InterfaceId {
        match self {
            TimerKind::GeneralQuery { interface }
            | TimerKind::HostResponse { interface, .. }
            | TimerKind::MembershipExpiry { interface, .. }
            | TimerKind::Retransmit { interface, .. } => *interface,
        }
    }

    /// Group the timer belongs to, if it is a per-group timer
    pub fn group(&self) -> Option<GroupAddress> {
        match self {
            TimerKind::GeneralQuery { .. } => None,
            TimerKind::HostResponse { group, .. }
            | TimerKind::MembershipExpiry { group, .. }
            | TimerKind::Retransmit { group, .. } => Some(*group),
        }
    }
}

/// Request to schedule or cancel a timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerRequest {
    /// Arm the timer, replacing any deadline it already has
    Start { kind: TimerKind, fire_at: Instant },
    /// Disarm the timer; a no-op if it is not armed
    Cancel { kind: TimerKind },
}

impl TimerRequest {
    pub fn kind(&self) -> &TimerKind {
        match self {
            TimerRequest::Start { kind, .. } | TimerRequest::Cancel { kind } => kind,
        }
    }
}

/// Common trait for protocol packet builders
pub trait PacketBuilder {
    /// Build a packet for transmission
    fn build(&self) -> Vec<u8>;

    /// Calculate checksum for the packet
    fn calculate_checksum(&self, data: &[u8]) -> u16 {
        internet_checksum(data)
    }
}

/// RFC 1071 one's-complement checksum
///
/// Over a packet whose checksum field is already filled in, the result is
/// zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(word as u32);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
