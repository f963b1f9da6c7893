// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interface registry
//!
//! The registry is the node's read-mostly view of the interface table: which
//! interfaces exist, their addresses, whether multicast forwarding is on, and
//! the per-interface multicast listener set the router engine maintains.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::config::Config;
use crate::{GroupAddress, InterfaceId};

/// Static facts about one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub id: InterfaceId,
    pub name: String,
    pub address: Ipv4Addr,
    pub loopback: bool,
}

impl InterfaceInfo {
    pub fn new(id: InterfaceId, name: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            loopback: false,
        }
    }

    pub fn loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }
}

/// Query service over the interface table
///
/// Listener-set mutation is the only write the node performs, and only from
/// router membership transitions.
pub trait InterfaceRegistry: Send {
    /// All interfaces currently known, in id order
    fn interfaces(&self) -> Vec<InterfaceInfo>;

    /// Look up one interface
    fn interface(&self, id: InterfaceId) -> Option<InterfaceInfo>;

    /// Whether the node routes multicast (and so runs the router engines)
    fn multicast_forwarding_enabled(&self) -> bool;

    /// Add a group to an interface's listener set
    fn add_multicast_listener(&mut self, id: InterfaceId, group: GroupAddress);

    /// Remove a group from an interface's listener set
    fn remove_multicast_listener(&mut self, id: InterfaceId, group: GroupAddress);

    /// Current listener set of an interface
    fn multicast_listeners(&self, id: InterfaceId) -> Vec<GroupAddress>;
}

/// In-memory registry, populated from configuration or by hand
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    interfaces: BTreeMap<InterfaceId, InterfaceInfo>,
    listeners: BTreeMap<InterfaceId, BTreeSet<GroupAddress>>,
    forwarding: bool,
}

impl StaticRegistry {
    pub fn new(forwarding: bool) -> Self {
        Self {
            forwarding,
            ..Default::default()
        }
    }

    /// Build the registry described by a configuration
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new(config.multicast_forwarding);
        for (id, spec) in config.interface_ids().into_iter().zip(&config.interfaces) {
            registry.add(
                InterfaceInfo::new(id, spec.name.clone(), spec.address)
                    .loopback(spec.loopback),
            );
        }
        registry
    }

    pub fn with_interface(mut self, info: InterfaceInfo) -> Self {
        self.add(info);
        self
    }

    /// Add or replace an interface
    pub fn add(&mut self, info: InterfaceInfo) {
        self.interfaces.insert(info.id, info);
    }

    /// Remove an interface together with its listener set
    pub fn remove(&mut self, id: InterfaceId) -> Option<InterfaceInfo> {
        self.listeners.remove(&id);
        self.interfaces.remove(&id)
    }

    pub fn set_forwarding(&mut self, enabled: bool) {
        self.forwarding = enabled;
    }
}

impl InterfaceRegistry for StaticRegistry {
    fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.interfaces.values().cloned().collect()
    }

    fn interface(&self, id: InterfaceId) -> Option<InterfaceInfo> {
        self.interfaces.get(&id).cloned()
    }

    fn multicast_forwarding_enabled(&self) -> bool {
        self.forwarding
    }

    fn add_multicast_listener(&mut self, id: InterfaceId, group: GroupAddress) {
        self.listeners.entry(id).or_default().insert(group);
    }

    fn remove_multicast_listener(&mut self, id: InterfaceId, group: GroupAddress) {
        if let Some(set) = self.listeners.get_mut(&id) {
            set.remove(&group);
            if set.is_empty() {
                self.listeners.remove(&id);
            }
        }
    }

    fn multicast_listeners(&self, id: InterfaceId) -> Vec<GroupAddress> {
        self.listeners
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
