// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Engine action types
//!
//! Engines return an [`Actions`] value instead of touching the timer queue,
//! the registry, the notification bus or the network themselves. The node
//! applies the actions in a fixed order once the engine call has returned,
//! so every transition runs to completion before any side effect happens.

use std::net::Ipv4Addr;

use crate::protocols::message::IgmpMessage;
use crate::protocols::TimerRequest;
use crate::{GroupAddress, InterfaceId, MembershipNotification};

/// IP protocol number carried by every outgoing IGMP message
pub const IGMP_PROTOCOL: u8 = 2;

/// TTL of every outgoing IGMP message
pub const IGMP_TTL: u8 = 1;

/// Change to an interface's multicast listener set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerAction {
    Add {
        interface: InterfaceId,
        group: GroupAddress,
    },
    Remove {
        interface: InterfaceId,
        group: GroupAddress,
    },
}

/// A message handed to the network-send primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub interface: InterfaceId,
    pub destination: Ipv4Addr,
    pub message: IgmpMessage,
    pub protocol: u8,
    pub ttl: u8,
}

impl OutgoingMessage {
    pub fn new(interface: InterfaceId, destination: Ipv4Addr, message: IgmpMessage) -> Self {
        Self {
            interface,
            destination,
            message,
            protocol: IGMP_PROTOCOL,
            ttl: IGMP_TTL,
        }
    }

    /// Query addressed to all-hosts (general) or to the group itself
    pub fn query(interface: InterfaceId, message: IgmpMessage) -> Self {
        let destination = message
            .group()
            .unwrap_or(GroupAddress::ALL_HOSTS)
            .addr();
        Self::new(interface, destination, message)
    }

    /// Report addressed to the group being reported
    pub fn report(interface: InterfaceId, group: GroupAddress) -> Self {
        Self::new(interface, group.addr(), IgmpMessage::Report { group })
    }

    /// Leave addressed to all-routers
    pub fn leave(interface: InterfaceId, group: GroupAddress) -> Self {
        Self::new(
            interface,
            GroupAddress::ALL_ROUTERS.addr(),
            IgmpMessage::Leave { group },
        )
    }

    /// Wire bytes of the IGMP payload
    pub fn encode(&self) -> Vec<u8> {
        self.message.encode()
    }
}

/// Side effects requested by an engine operation
///
/// Applied by the node in field order: timers, listeners, notifications,
/// then packets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Actions {
    /// Timer requests to schedule or cancel
    pub timers: Vec<TimerRequest>,
    /// Listener set changes for the interface registry
    pub listeners: Vec<ListenerAction>,
    /// Notifications to emit to subscribers
    pub notifications: Vec<MembershipNotification>,
    /// Messages to send
    pub packets: Vec<OutgoingMessage>,
}

impl Actions {
    /// Create a new empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timer request
    pub fn add_timer(&mut self, timer: TimerRequest) {
        self.timers.push(timer);
    }

    pub fn add_listener(&mut self, action: ListenerAction) {
        self.listeners.push(action);
    }

    /// Add a notification
    pub fn notify(&mut self, notification: MembershipNotification) {
        self.notifications.push(notification);
    }

    pub fn send(&mut self, packet: OutgoingMessage) {
        self.packets.push(packet);
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: Actions) {
        self.timers.extend(other.timers);
        self.listeners.extend(other.listeners);
        self.notifications.extend(other.notifications);
        self.packets.extend(other.packets);
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
            && self.listeners.is_empty()
            && self.notifications.is_empty()
            && self.packets.is_empty()
    }
}
