// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMP node: dispatcher and owner of all protocol state
//!
//! [`IgmpNode`] owns the three engines, the timer queue, the interface
//! registry and the notification bus. Everything enters through it: control
//! events, inbound packets and timer expiries. Each entry point calls one
//! engine operation and then applies the returned [`Actions`] in order:
//!
//! 1. timer requests go to the [`TimerQueue`]
//! 2. listener changes go to the [`InterfaceRegistry`]
//! 3. notifications go to the [`EventSubscriptionManager`]
//! 4. packets pass the send gate and are queued for [`IgmpNode::take_outgoing`]
//!
//! The send gate drops Queries on interfaces where this node is not the
//! querier, and refuses any send on a loopback interface.

pub mod actions;
pub mod event_subscription;
pub mod timer_manager;

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::config::{Config, IgmpTimers};
use crate::logging::{Facility, Logger};
use crate::protocols::host::HostEngine;
use crate::protocols::message::{from_tenths, DecodeError, IgmpMessage, IGMP_MEMBERSHIP_QUERY};
use crate::protocols::querier::QueryEngine;
use crate::protocols::router::RouterEngine;
use crate::protocols::TimerKind;
use crate::registry::{InterfaceInfo, InterfaceRegistry, StaticRegistry};
use crate::stats::IgmpStats;
use crate::{log_debug, log_error, log_info, log_warning};
use crate::{ControlEvent, Error, GroupAddress, InterfaceId, MembershipNotification, Result};

pub use actions::{Actions, ListenerAction, OutgoingMessage};
pub use event_subscription::EventSubscriptionManager;
pub use timer_manager::TimerQueue;

/// An unrecognized message handed to an external router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughMessage {
    pub interface: InterfaceId,
    pub source: Ipv4Addr,
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Consumer of IGMP messages this node does not process itself
///
/// Without one attached, an unrecognized message type is a fatal error.
pub trait RouterPassthrough: Send {
    fn forward(&mut self, message: PassthroughMessage);
}

impl RouterPassthrough for mpsc::UnboundedSender<PassthroughMessage> {
    fn forward(&mut self, message: PassthroughMessage) {
        // A closed channel means the external router went away; the message
        // is dropped like any other packet with no receiver.
        let _ = self.send(message);
    }
}

/// An IGMPv2 speaker: host side always, router side when forwarding is on
pub struct IgmpNode<R: InterfaceRegistry = StaticRegistry> {
    config: Config,
    timers: IgmpTimers,
    registry: R,
    host: HostEngine,
    router: RouterEngine,
    querier: QueryEngine,
    queue: TimerQueue,
    events: EventSubscriptionManager,
    external_router: Option<Box<dyn RouterPassthrough>>,
    outgoing: Vec<OutgoingMessage>,
    stats: IgmpStats,
    logger: Logger,
}

impl<R: InterfaceRegistry> IgmpNode<R> {
    /// Build a node; fails if the configuration does not validate
    pub fn new(config: Config, registry: R, events: EventSubscriptionManager, logger: Logger) -> Result<Self> {
        config.validate()?;
        let timers = config.timers();
        Ok(Self {
            host: HostEngine::new(timers.unsolicited_report_interval, logger.clone()),
            router: RouterEngine::new(timers, logger.clone()),
            querier: QueryEngine::new(timers, logger.clone()),
            config,
            timers,
            registry,
            queue: TimerQueue::new(),
            events,
            external_router: None,
            outgoing: Vec::new(),
            stats: IgmpStats::default(),
            logger,
        })
    }

    /// Seed the host engine's random delays, for reproducible runs
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.host.reseed(seed);
    }

    /// Hand unrecognized message types to `router` instead of failing
    pub fn attach_external_router(&mut self, router: Box<dyn RouterPassthrough>) {
        self.external_router = Some(router);
    }

    /// Configure every interface the registry already knows
    pub fn start(&mut self, now: Instant) -> Result<()> {
        log_info!(
            self.logger,
            Facility::Runtime,
            "Starting IGMP node: enabled={} forwarding={} interfaces={}",
            self.config.enabled,
            self.registry.multicast_forwarding_enabled(),
            self.registry.interfaces().len()
        );
        for iface in self.registry.interfaces() {
            self.configure_interface(&iface, now)?;
        }
        Ok(())
    }

    /// Apply an event from the interface table or the socket layer
    pub fn handle_control_event(&mut self, event: ControlEvent, now: Instant) -> Result<()> {
        match event {
            ControlEvent::InterfaceCreated(id) => {
                let iface = self.lookup(id)?;
                self.configure_interface(&iface, now)
            }
            ControlEvent::InterfaceDeleted(id) => {
                self.remove_interface(id);
                Ok(())
            }
            ControlEvent::GroupJoined { interface, group } => self.join_group(interface, group, now),
            ControlEvent::GroupLeft { interface, group } => self.leave_group(interface, group),
        }
    }

    /// A local application joined `group` on `interface`
    pub fn join_group(&mut self, interface: InterfaceId, group: GroupAddress, now: Instant) -> Result<()> {
        let iface = self.lookup(interface)?;
        let actions = self.host.join_group(&iface, group, self.config.enabled, now);
        self.apply(&iface, actions)
    }

    /// A local application left `group` on `interface`
    pub fn leave_group(&mut self, interface: InterfaceId, group: GroupAddress) -> Result<()> {
        let iface = self.lookup(interface)?;
        let actions = self.host.leave_group(&iface, group, self.config.enabled);
        self.apply(&iface, actions)
    }

    /// Decode and dispatch raw IGMP bytes received on `interface` from `source`
    ///
    /// Packets that fail to decode are counted and dropped.
    pub fn receive(&mut self, interface: InterfaceId, source: Ipv4Addr, data: &[u8], now: Instant) -> Result<()> {
        if !self.config.enabled {
            log_debug!(self.logger, Facility::Dispatcher, "IGMP disabled, dropping packet");
            return Ok(());
        }
        match IgmpMessage::decode(data) {
            Ok(message) => self.receive_message(interface, source, message, now),
            Err(e) => {
                self.stats.malformed_received += 1;
                log_warning!(
                    self.logger,
                    Facility::Dispatcher,
                    "Dropping malformed IGMP packet from {} on {}: {}",
                    source,
                    interface,
                    e
                );
                match e {
                    DecodeError::InvalidGroup {
                        msg_type: IGMP_MEMBERSHIP_QUERY,
                        ..
                    } => self.query_sender_seen(interface, source, now),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Run querier election for a query whose group field was unusable
    ///
    /// The sender is still a querier on the link even though no host or
    /// router record can match the group it named.
    fn query_sender_seen(&mut self, interface: InterfaceId, source: Ipv4Addr, now: Instant) -> Result<()> {
        let iface = self.lookup(interface)?;
        if iface.loopback || !self.registry.multicast_forwarding_enabled() {
            return Ok(());
        }
        let actions = self.querier.query_received(&iface, source, now);
        self.apply(&iface, actions)
    }

    /// Dispatch an already-decoded message
    pub fn receive_message(
        &mut self,
        interface: InterfaceId,
        source: Ipv4Addr,
        message: IgmpMessage,
        now: Instant,
    ) -> Result<()> {
        if !self.config.enabled {
            log_debug!(self.logger, Facility::Dispatcher, "IGMP disabled, dropping packet");
            return Ok(());
        }
        let iface = self.lookup(interface)?;
        if iface.loopback {
            log_debug!(
                self.logger,
                Facility::Dispatcher,
                "Ignoring {} on loopback {}",
                message.type_name(),
                iface.name
            );
            return Ok(());
        }

        self.stats.record_received(&message);
        let forwarding = self.registry.multicast_forwarding_enabled();

        let actions = match message {
            IgmpMessage::Query { group, max_resp_time } => {
                let max_resp = from_tenths(max_resp_time);
                let mut actions = self.host.query_received(&iface, group, max_resp, now);
                if forwarding {
                    actions.merge(self.querier.query_received(&iface, source, now));
                }
                actions
            }
            IgmpMessage::Report { group } => {
                let mut actions = self.host.report_received(&iface, group);
                actions.merge(self.router.report_received(&iface, group, forwarding, now));
                actions
            }
            IgmpMessage::Leave { group } => {
                let is_querier = self.querier.is_querier(iface.id);
                self.router
                    .leave_received(&iface, group, Duration::ZERO, forwarding, is_querier, now)
            }
            IgmpMessage::Unrecognized { msg_type, payload } => {
                return self.pass_through(&iface, source, msg_type, payload);
            }
        };
        self.apply(&iface, actions)
    }

    /// Fire every timer due at or before `now`, in deadline order
    ///
    /// Returns how many timers fired. While the node is disabled due timers
    /// are discarded without advancing any state machine.
    pub fn fire_due_timers(&mut self, now: Instant) -> Result<usize> {
        let mut fired = 0;
        while let Some((kind, fire_at)) = self.queue.pop_due(now) {
            if !self.config.enabled {
                continue;
            }
            log_debug!(self.logger, Facility::Timers, "Timer expired: {:?}", kind);
            self.dispatch_timer(kind, fire_at)?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Deadline of the next armed timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Drain messages that passed the send gate
    pub fn take_outgoing(&mut self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Counter snapshot, including current group counts
    pub fn stats(&self) -> IgmpStats {
        IgmpStats {
            host_groups: self.host.group_count() as u64,
            router_groups: self.router.group_count() as u64,
            ..self.stats
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipNotification> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timers(&self) -> &IgmpTimers {
        &self.timers
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn host(&self) -> &HostEngine {
        &self.host
    }

    pub fn router(&self) -> &RouterEngine {
        &self.router
    }

    pub fn querier(&self) -> &QueryEngine {
        &self.querier
    }

    pub fn timer_queue(&self) -> &TimerQueue {
        &self.queue
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    fn lookup(&self, id: InterfaceId) -> Result<InterfaceInfo> {
        self.registry
            .interface(id)
            .ok_or(Error::UnknownInterface(id))
    }

    fn configure_interface(&mut self, iface: &InterfaceInfo, now: Instant) -> Result<()> {
        if iface.loopback || !self.config.enabled || !self.registry.multicast_forwarding_enabled() {
            return Ok(());
        }
        let actions = self.querier.activate(iface, now);
        self.apply(iface, actions)
    }

    fn remove_interface(&mut self, id: InterfaceId) {
        let mut actions = self.host.remove_interface(id);
        actions.merge(self.router.remove_interface(id));
        actions.merge(self.querier.remove_interface(id));
        self.queue.apply(actions.timers);
        log_info!(self.logger, Facility::Runtime, "Interface {} removed", id);
    }

    fn pass_through(&mut self, iface: &InterfaceInfo, source: Ipv4Addr, msg_type: u8, payload: Vec<u8>) -> Result<()> {
        let Some(router) = self.external_router.as_mut() else {
            log_error!(
                self.logger,
                Facility::Dispatcher,
                "Unhandled IGMP message type {:#04x} from {} on {}",
                msg_type,
                source,
                iface.name
            );
            return Err(Error::UnhandledMessageType { msg_type });
        };
        router.forward(PassthroughMessage {
            interface: iface.id,
            source,
            msg_type,
            payload,
        });
        self.stats.passed_through += 1;
        Ok(())
    }

    fn dispatch_timer(&mut self, kind: TimerKind, now: Instant) -> Result<()> {
        let iface = self.registry.interface(kind.interface()).ok_or_else(|| {
            Error::Invariant(format!("{:?} fired for an interface no longer registered", kind))
        })?;
        let actions = match kind {
            TimerKind::GeneralQuery { .. } => self.querier.general_query_timer_fired(&iface, now)?,
            TimerKind::HostResponse { group, .. } => self.host.response_timer_fired(&iface, group)?,
            TimerKind::MembershipExpiry { group, .. } => self.router.membership_timer_fired(&iface, group)?,
            TimerKind::Retransmit { group, .. } => self.router.retransmit_timer_fired(&iface, group, now)?,
        };
        self.apply(&iface, actions)
    }

    fn apply(&mut self, iface: &InterfaceInfo, actions: Actions) -> Result<()> {
        self.queue.apply(actions.timers);

        for listener in actions.listeners {
            match listener {
                ListenerAction::Add { interface, group } => {
                    self.registry.add_multicast_listener(interface, group)
                }
                ListenerAction::Remove { interface, group } => {
                    self.registry.remove_multicast_listener(interface, group)
                }
            }
        }

        for notification in actions.notifications {
            let receivers = self.events.send(notification.clone());
            log_debug!(
                self.logger,
                Facility::Router,
                "Published {:?} to {} subscribers",
                notification,
                receivers
            );
        }

        for packet in actions.packets {
            if iface.loopback {
                return Err(Error::Invariant(format!(
                    "attempted to send {} on loopback {}",
                    packet.message.type_name(),
                    iface.name
                )));
            }
            if matches!(packet.message, IgmpMessage::Query { .. }) && !self.querier.is_querier(packet.interface) {
                log_debug!(
                    self.logger,
                    Facility::Dispatcher,
                    "Suppressing query on {}: not the querier",
                    iface.name
                );
                continue;
            }
            self.stats.record_sent(&packet.message);
            self.outgoing.push(packet);
        }
        Ok(())
    }
}
