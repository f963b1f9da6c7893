// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv2 message codec
//!
//! All IGMPv2 messages share one 8-byte envelope:
//!
//! ```text
//!  0               1               2               3
//! +---------------+---------------+-------------------------------+
//! |     Type      | Max Resp Time |           Checksum            |
//! +---------------+---------------+-------------------------------+
//! |                         Group Address                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Decoding yields a closed [`IgmpMessage`] enum. Types this node does not
//! process (including IGMPv1 reports) become [`IgmpMessage::Unrecognized`]
//! carrying the raw bytes, so they can be handed on untouched.

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use super::{internet_checksum, PacketBuilder};
use crate::GroupAddress;

/// IGMP message type: Membership Query
pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
/// IGMP message type: Version 1 Membership Report
pub const IGMP_V1_MEMBERSHIP_REPORT: u8 = 0x12;
/// IGMP message type: Version 2 Membership Report
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;
/// IGMP message type: Leave Group
pub const IGMP_LEAVE_GROUP: u8 = 0x17;

/// Size of an IGMPv2 message on the wire
pub const IGMP_MESSAGE_LEN: usize = 8;

/// Errors from decoding an inbound IGMP message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("IGMP message too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("IGMP checksum mismatch")]
    ChecksumMismatch,

    #[error("IGMP {msg_type:#04x} carries non-multicast group {addr}")]
    InvalidGroup { msg_type: u8, addr: Ipv4Addr },
}

/// A decoded IGMPv2 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgmpMessage {
    /// Membership Query; `group` is `None` for a General Query
    Query {
        group: Option<GroupAddress>,
        /// Maximum response time in tenths of a second
        max_resp_time: u8,
    },
    /// Version 2 Membership Report
    Report { group: GroupAddress },
    /// Leave Group
    Leave { group: GroupAddress },
    /// Any other type, kept verbatim
    Unrecognized { msg_type: u8, payload: Vec<u8> },
}

impl IgmpMessage {
    /// General Query with the given maximum response time
    pub fn general_query(max_resp: Duration) -> Self {
        IgmpMessage::Query {
            group: None,
            max_resp_time: tenths_of_second(max_resp),
        }
    }

    /// Group-specific Query with the given maximum response time
    pub fn group_query(group: GroupAddress, max_resp: Duration) -> Self {
        IgmpMessage::Query {
            group: Some(group),
            max_resp_time: tenths_of_second(max_resp),
        }
    }

    /// Decode a message from raw IGMP bytes (IP header already stripped)
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < IGMP_MESSAGE_LEN {
            return Err(DecodeError::TooShort {
                expected: IGMP_MESSAGE_LEN,
                actual: data.len(),
            });
        }

        let msg_type = data[0];
        if !matches!(
            msg_type,
            IGMP_MEMBERSHIP_QUERY | IGMP_V2_MEMBERSHIP_REPORT | IGMP_LEAVE_GROUP
        ) {
            return Ok(IgmpMessage::Unrecognized {
                msg_type,
                payload: data.to_vec(),
            });
        }

        if internet_checksum(data) != 0 {
            return Err(DecodeError::ChecksumMismatch);
        }

        let max_resp_time = data[1];
        let addr = Ipv4Addr::new(data[4], data[5], data[6], data[7]);

        match msg_type {
            IGMP_MEMBERSHIP_QUERY if addr.is_unspecified() => Ok(IgmpMessage::Query {
                group: None,
                max_resp_time,
            }),
            IGMP_MEMBERSHIP_QUERY => Ok(IgmpMessage::Query {
                group: Some(group_of(msg_type, addr)?),
                max_resp_time,
            }),
            IGMP_V2_MEMBERSHIP_REPORT => Ok(IgmpMessage::Report {
                group: group_of(msg_type, addr)?,
            }),
            _ => Ok(IgmpMessage::Leave {
                group: group_of(msg_type, addr)?,
            }),
        }
    }

    /// Encode the message into wire bytes
    pub fn encode(&self) -> Vec<u8> {
        self.build()
    }

    /// The type byte this message carries on the wire
    pub fn msg_type(&self) -> u8 {
        match self {
            IgmpMessage::Query { .. } => IGMP_MEMBERSHIP_QUERY,
            IgmpMessage::Report { .. } => IGMP_V2_MEMBERSHIP_REPORT,
            IgmpMessage::Leave { .. } => IGMP_LEAVE_GROUP,
            IgmpMessage::Unrecognized { msg_type, .. } => *msg_type,
        }
    }

    /// Group address field, `None` for General Queries and unknown types
    pub fn group(&self) -> Option<GroupAddress> {
        match self {
            IgmpMessage::Query { group, .. } => *group,
            IgmpMessage::Report { group } | IgmpMessage::Leave { group } => Some(*group),
            IgmpMessage::Unrecognized { .. } => None,
        }
    }

    /// Maximum response time of a Query, zero for every other message
    pub fn max_resp(&self) -> Duration {
        match self {
            IgmpMessage::Query { max_resp_time, .. } => from_tenths(*max_resp_time),
            _ => Duration::ZERO,
        }
    }

    /// Get the message type as a string
    pub fn type_name(&self) -> &'static str {
        match self.msg_type() {
            IGMP_MEMBERSHIP_QUERY => "Membership Query",
            IGMP_V1_MEMBERSHIP_REPORT => "V1 Membership Report",
            IGMP_V2_MEMBERSHIP_REPORT => "V2 Membership Report",
            IGMP_LEAVE_GROUP => "Leave Group",
            _ => "Unknown",
        }
    }
}

impl PacketBuilder for IgmpMessage {
    fn build(&self) -> Vec<u8> {
        let (max_resp_time, group) = match self {
            IgmpMessage::Unrecognized { payload, .. } => return payload.clone(),
            IgmpMessage::Query {
                group,
                max_resp_time,
            } => (
                *max_resp_time,
                group.map_or(Ipv4Addr::UNSPECIFIED, GroupAddress::addr),
            ),
            // Max Response Time is unused outside queries
            IgmpMessage::Report { group } | IgmpMessage::Leave { group } => (0, group.addr()),
        };

        let mut packet = Vec::with_capacity(IGMP_MESSAGE_LEN);
        packet.push(self.msg_type());
        packet.push(max_resp_time);

        // Checksum placeholder
        packet.push(0);
        packet.push(0);

        packet.extend_from_slice(&group.octets());

        let checksum = self.calculate_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());

        packet
    }
}

fn group_of(msg_type: u8, addr: Ipv4Addr) -> Result<GroupAddress, DecodeError> {
    GroupAddress::new(addr).ok_or(DecodeError::InvalidGroup { msg_type, addr })
}

/// Convert a duration to the wire's tenths-of-a-second unit, saturating at 255
pub fn tenths_of_second(duration: Duration) -> u8 {
    let tenths = (duration.as_secs_f64() * 10.0).round();
    tenths.clamp(0.0, u8::MAX as f64) as u8
}

/// Convert a wire max-response-time to a duration
pub fn from_tenths(tenths: u8) -> Duration {
    Duration::from_millis(tenths as u64 * 100)
}
