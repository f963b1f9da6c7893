// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router query engine
//!
//! One state machine per interface. The router with the lowest interface
//! address on a link is the querier. Every router starts out as querier and
//! steps down to non-querier when it hears a Query from a lower address;
//! when the other-querier-present timer runs out it takes the role back.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use super::message::IgmpMessage;
use super::{TimerKind, TimerRequest};
use crate::config::IgmpTimers;
use crate::logging::{Facility, Logger};
use crate::node::actions::{Actions, OutgoingMessage};
use crate::registry::InterfaceInfo;
use crate::{log_debug, log_notice};
use crate::{Error, InterfaceId, Result};

/// Querier election state of one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerierState {
    Initial,
    Querier,
    NonQuerier,
}

/// Per-interface query state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterInterfaceState {
    pub state: QuerierState,
    /// Deadline of the general query (or other-querier-present) timer
    pub query_timer: Option<Instant>,
}

/// Router query engine
#[derive(Debug)]
pub struct QueryEngine {
    interfaces: HashMap<InterfaceId, RouterInterfaceState>,
    timers: IgmpTimers,
    logger: Logger,
}

impl QueryEngine {
    pub fn new(timers: IgmpTimers, logger: Logger) -> Self {
        Self {
            interfaces: HashMap::new(),
            timers,
            logger,
        }
    }

    /// Start querying on an interface
    ///
    /// Loopback interfaces and interfaces already active are left alone.
    pub fn activate(&mut self, iface: &InterfaceInfo, now: Instant) -> Actions {
        let mut actions = Actions::new();
        if iface.loopback {
            return actions;
        }
        let entry = self.interfaces.entry(iface.id).or_insert(RouterInterfaceState {
            state: QuerierState::Initial,
            query_timer: None,
        });
        if entry.state != QuerierState::Initial {
            return actions;
        }

        entry.state = QuerierState::Querier;
        actions.send(general_query(iface.id, &self.timers));
        arm_query_timer(entry, iface.id, now + self.timers.startup_query_interval, &mut actions);

        log_notice!(self.logger, Facility::Querier, "{} is querier on {}", iface.address, iface.name);
        actions
    }

    /// The general query timer of an interface expired
    ///
    /// Both querier and non-querier resume the querier role here.
    pub fn general_query_timer_fired(&mut self, iface: &InterfaceInfo, now: Instant) -> Result<Actions> {
        let entry = self.interfaces.get_mut(&iface.id).ok_or_else(|| {
            Error::Invariant(format!(
                "general query timer fired on {} without querier state",
                iface.id
            ))
        })?;

        let mut actions = Actions::new();
        match entry.state {
            QuerierState::Querier | QuerierState::NonQuerier => {
                if entry.state == QuerierState::NonQuerier {
                    log_notice!(
                        self.logger,
                        Facility::Querier,
                        "Other querier timed out, resuming querier role on {}",
                        iface.name
                    );
                }
                entry.state = QuerierState::Querier;
                actions.send(general_query(iface.id, &self.timers));
                arm_query_timer(entry, iface.id, now + self.timers.query_interval, &mut actions);
            }
            QuerierState::Initial => {
                entry.query_timer = None;
            }
        }
        Ok(actions)
    }

    /// A Query from `sender` arrived on `iface`
    ///
    /// A sender with a lower address wins the election; this router steps
    /// down until the other-querier-present interval passes without hearing
    /// from it again.
    pub fn query_received(&mut self, iface: &InterfaceInfo, sender: Ipv4Addr, now: Instant) -> Actions {
        let mut actions = Actions::new();
        if sender >= iface.address {
            return actions;
        }
        let Some(entry) = self.interfaces.get_mut(&iface.id) else {
            log_debug!(
                self.logger,
                Facility::Querier,
                "Query from {} on inactive interface {}",
                sender,
                iface.name
            );
            return actions;
        };

        if entry.state == QuerierState::Querier {
            log_notice!(
                self.logger,
                Facility::Querier,
                "{} yields querier role on {} to {}",
                iface.address,
                iface.name,
                sender
            );
        }
        arm_query_timer(
            entry,
            iface.id,
            now + self.timers.other_querier_present_interval,
            &mut actions,
        );
        entry.state = QuerierState::NonQuerier;
        actions
    }

    /// Forget an interface, cancelling its query timer
    pub fn remove_interface(&mut self, interface: InterfaceId) -> Actions {
        let mut actions = Actions::new();
        if let Some(entry) = self.interfaces.remove(&interface) {
            if entry.query_timer.is_some() {
                actions.add_timer(TimerRequest::Cancel {
                    kind: TimerKind::GeneralQuery { interface },
                });
            }
        }
        actions
    }

    pub fn state(&self, interface: InterfaceId) -> Option<QuerierState> {
        self.interfaces.get(&interface).map(|entry| entry.state)
    }

    pub fn interface_state(&self, interface: InterfaceId) -> Option<&RouterInterfaceState> {
        self.interfaces.get(&interface)
    }

    pub fn is_querier(&self, interface: InterfaceId) -> bool {
        self.state(interface) == Some(QuerierState::Querier)
    }
}

fn general_query(interface: InterfaceId, timers: &IgmpTimers) -> OutgoingMessage {
    OutgoingMessage::query(
        interface,
        IgmpMessage::general_query(timers.query_response_interval),
    )
}

fn arm_query_timer(
    entry: &mut RouterInterfaceState,
    interface: InterfaceId,
    fire_at: Instant,
    actions: &mut Actions,
) {
    entry.query_timer = Some(fire_at);
    actions.add_timer(TimerRequest::Start {
        kind: TimerKind::GeneralQuery { interface },
        fire_at,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn iface(address: &str) -> InterfaceInfo {
        InterfaceInfo::new(InterfaceId(1), "eth0", address.parse().unwrap())
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(IgmpTimers::default(), Logger::null())
    }

    fn query_deadline(actions: &Actions) -> Option<Instant> {
        actions.timers.iter().find_map(|timer| match timer {
            TimerRequest::Start { fire_at, .. } => Some(*fire_at),
            TimerRequest::Cancel { .. } => None,
        })
    }

    #[test]
    fn test_activate_sends_general_query() {
        let mut engine = engine();
        let now = Instant::now();

        let actions = engine.activate(&iface("10.0.0.2"), now);

        assert_eq!(actions.packets.len(), 1);
        assert_eq!(
            actions.packets[0].message,
            IgmpMessage::Query {
                group: None,
                max_resp_time: 100
            }
        );
        assert_eq!(
            actions.packets[0].destination,
            Ipv4Addr::new(224, 0, 0, 1)
        );
        // Startup query interval defaults to a quarter of the query interval
        assert_eq!(query_deadline(&actions), Some(now + Duration::from_millis(31_250)));
        assert!(engine.is_querier(InterfaceId(1)));
    }

    #[test]
    fn test_activate_twice_is_noop() {
        let mut engine = engine();
        let now = Instant::now();
        engine.activate(&iface("10.0.0.2"), now);
        assert!(engine.activate(&iface("10.0.0.2"), now).is_empty());
    }

    #[test]
    fn test_loopback_never_activates() {
        let mut engine = engine();
        let lo = iface("127.0.0.1").loopback(true);
        assert!(engine.activate(&lo, Instant::now()).is_empty());
        assert_eq!(engine.state(InterfaceId(1)), None);
    }

    #[test]
    fn test_lower_sender_demotes() {
        let mut engine = engine();
        let now = Instant::now();
        engine.activate(&iface("10.0.0.2"), now);

        let actions = engine.query_received(&iface("10.0.0.2"), "10.0.0.1".parse().unwrap(), now);

        assert_eq!(query_deadline(&actions), Some(now + Duration::from_secs(255)));
        assert_eq!(engine.state(InterfaceId(1)), Some(QuerierState::NonQuerier));
    }

    #[test]
    fn test_higher_or_equal_sender_ignored() {
        let mut engine = engine();
        let now = Instant::now();
        engine.activate(&iface("10.0.0.2"), now);

        assert!(engine
            .query_received(&iface("10.0.0.2"), "10.0.0.3".parse().unwrap(), now)
            .is_empty());
        assert!(engine
            .query_received(&iface("10.0.0.2"), "10.0.0.2".parse().unwrap(), now)
            .is_empty());
        assert!(engine.is_querier(InterfaceId(1)));
    }

    #[test]
    fn test_timer_restores_querier() {
        let mut engine = engine();
        let now = Instant::now();
        engine.activate(&iface("10.0.0.2"), now);
        engine.query_received(&iface("10.0.0.2"), "10.0.0.1".parse().unwrap(), now);

        let later = now + Duration::from_secs(255);
        let actions = engine
            .general_query_timer_fired(&iface("10.0.0.2"), later)
            .unwrap();

        assert_eq!(actions.packets.len(), 1);
        assert_eq!(query_deadline(&actions), Some(later + Duration::from_secs(125)));
        assert!(engine.is_querier(InterfaceId(1)));
    }

    #[test]
    fn test_timer_without_state_is_invariant_error() {
        let mut engine = engine();
        assert!(matches!(
            engine.general_query_timer_fired(&iface("10.0.0.2"), Instant::now()),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn test_remove_interface() {
        let mut engine = engine();
        engine.activate(&iface("10.0.0.2"), Instant::now());

        let actions = engine.remove_interface(InterfaceId(1));

        assert_eq!(
            actions.timers,
            vec![TimerRequest::Cancel {
                kind: TimerKind::GeneralQuery {
                    interface: InterfaceId(1)
                }
            }]
        );
        assert_eq!(engine.state(InterfaceId(1)), None);
    }
}
