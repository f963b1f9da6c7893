// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Simulated broadcast link
//!
//! [`Lan`] puts several [`IgmpNode`]s on one shared segment and drives them
//! in virtual time. Each node has a single interface, `eth0`, with the
//! address it was added with. A message sent by one node is delivered to
//! every other node, with the sender's address as source, at the same
//! virtual instant.
//!
//! Time only moves inside [`Lan::run_until`], which jumps straight from one
//! timer deadline to the next, so hours of protocol time run in
//! milliseconds.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::Config;
use crate::logging::{Facility, Logger};
use crate::node::{EventSubscriptionManager, IgmpNode};
use crate::protocols::message::IgmpMessage;
use crate::registry::{InterfaceInfo, StaticRegistry};
use crate::stats::IgmpStats;
use crate::{log_debug, log_info};
use crate::{GroupAddress, InterfaceId, MembershipNotification, Result};

/// Interface id every simulated node uses for the link
pub const LAN_INTERFACE: InterfaceId = InterfaceId(1);

/// Index of a node on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// One message seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Virtual time since the link was created
    pub at: Duration,
    pub from: NodeHandle,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub message: IgmpMessage,
}

impl fmt::Display for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>10.3}s {} -> {} {}",
            self.at.as_secs_f64(),
            self.source,
            self.destination,
            self.message.type_name()
        )?;
        match &self.message {
            IgmpMessage::Query {
                group,
                max_resp_time,
            } => {
                match group {
                    Some(group) => write!(f, " group={}", group)?,
                    None => write!(f, " general")?,
                }
                write!(f, " max_resp={}", max_resp_time)
            }
            IgmpMessage::Report { group } | IgmpMessage::Leave { group } => {
                write!(f, " group={}", group)
            }
            IgmpMessage::Unrecognized { msg_type, .. } => write!(f, " type={:#04x}", msg_type),
        }
    }
}

struct LanNode {
    name: String,
    address: Ipv4Addr,
    node: IgmpNode<StaticRegistry>,
}

/// A shared link of IGMP nodes in virtual time
pub struct Lan {
    nodes: Vec<LanNode>,
    start: Instant,
    now: Instant,
    seed: u64,
    transmissions: Vec<Transmission>,
    logger: Logger,
}

impl Lan {
    pub fn new(logger: Logger) -> Self {
        let start = Instant::now();
        Self {
            nodes: Vec::new(),
            start,
            now: start,
            seed: 0,
            transmissions: Vec::new(),
            logger,
        }
    }

    /// Base seed for the nodes' random delays; node `n` uses `seed + n`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Attach a node and start it at the current virtual time
    ///
    /// Whether it acts as a router is taken from
    /// `config.multicast_forwarding`; `config.interfaces` is ignored.
    pub fn add_node(&mut self, name: impl Into<String>, address: Ipv4Addr, config: Config) -> Result<NodeHandle> {
        let name = name.into();
        let registry = StaticRegistry::new(config.multicast_forwarding)
            .with_interface(InterfaceInfo::new(LAN_INTERFACE, "eth0", address));
        let mut node = IgmpNode::new(
            config,
            registry,
            EventSubscriptionManager::default(),
            self.logger.clone(),
        )?;

        let handle = NodeHandle(self.nodes.len());
        node.set_rng_seed(self.seed.wrapping_add(handle.0 as u64));
        node.start(self.now)?;

        log_info!(self.logger, Facility::Simulation, "Added node {} at {}", name, address);
        self.nodes.push(LanNode { name, address, node });
        self.deliver()?;
        Ok(handle)
    }

    /// Local application on `handle` joins `group`
    pub fn join(&mut self, handle: NodeHandle, group: GroupAddress) -> Result<()> {
        let now = self.now;
        self.nodes[handle.0].node.join_group(LAN_INTERFACE, group, now)?;
        self.deliver()
    }

    /// Local application on `handle` leaves `group`
    pub fn leave(&mut self, handle: NodeHandle, group: GroupAddress) -> Result<()> {
        self.nodes[handle.0].node.leave_group(LAN_INTERFACE, group)?;
        self.deliver()
    }

    /// Advance virtual time to `deadline`, firing every timer on the way
    pub fn run_until(&mut self, deadline: Instant) -> Result<()> {
        while let Some(next) = self.next_deadline() {
            if next > deadline {
                break;
            }
            self.now = self.now.max(next);
            let now = self.now;
            for entry in &mut self.nodes {
                entry.node.fire_due_timers(now)?;
            }
            self.deliver()?;
        }
        self.now = self.now.max(deadline);
        Ok(())
    }

    /// Advance virtual time by `duration`
    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        self.run_until(self.now + duration)
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Virtual time since the link was created
    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    pub fn node(&self, handle: NodeHandle) -> &IgmpNode<StaticRegistry> {
        &self.nodes[handle.0].node
    }

    pub fn name(&self, handle: NodeHandle) -> &str {
        &self.nodes[handle.0].name
    }

    pub fn address(&self, handle: NodeHandle) -> Ipv4Addr {
        self.nodes[handle.0].address
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> {
        (0..self.nodes.len()).map(NodeHandle)
    }

    pub fn subscribe(&self, handle: NodeHandle) -> broadcast::Receiver<MembershipNotification> {
        self.nodes[handle.0].node.subscribe()
    }

    pub fn stats(&self, handle: NodeHandle) -> IgmpStats {
        self.nodes[handle.0].node.stats()
    }

    /// Every message sent on the link so far, in send order
    pub fn transmissions(&self) -> &[Transmission] {
        &self.transmissions
    }

    pub fn clear_transmissions(&mut self) {
        self.transmissions.clear();
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        self.nodes
            .iter_mut()
            .filter_map(|entry| entry.node.next_deadline())
            .min()
    }

    /// Hand every pending outgoing message to all other nodes until the link
    /// is quiet
    fn deliver(&mut self) -> Result<()> {
        loop {
            let mut pending = Vec::new();
            for (idx, entry) in self.nodes.iter_mut().enumerate() {
                for packet in entry.node.take_outgoing() {
                    pending.push((idx, entry.address, packet));
                }
            }
            if pending.is_empty() {
                return Ok(());
            }

            for (from, source, packet) in pending {
                let bytes = packet.encode();
                let transmission = Transmission {
                    at: self.elapsed(),
                    from: NodeHandle(from),
                    source,
                    destination: packet.destination,
                    message: packet.message,
                };
                log_debug!(self.logger, Facility::Simulation, "{}", transmission);
                self.transmissions.push(transmission);

                let now = self.now;
                for (idx, entry) in self.nodes.iter_mut().enumerate() {
                    if idx != from {
                        entry.node.receive(LAN_INTERFACE, source, &bytes, now)?;
                    }
                }
            }
        }
    }
}
