// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router membership engine
//!
//! Tracks, per (interface, group), whether any member is present on the
//! link. A record exists exactly while its state is not `NoMembersPresent`;
//! the membership timer firing is the only way a record goes away during
//! normal operation.
//!
//! ```text
//!  NoMembersPresent ──report──▶ MembersPresent ──leave──▶ CheckingMembership
//!         ▲                        ▲    │                      │    │
//!         │                        │    └─────── report ◀──────┘    │
//!         └──────────── membership timer ◀───────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::message::IgmpMessage;
use super::{TimerKind, TimerRequest};
use crate::config::IgmpTimers;
use crate::logging::{Facility, Logger, Severity};
use crate::node::actions::{Actions, ListenerAction, OutgoingMessage};
use crate::registry::InterfaceInfo;
use crate::{log_debug, log_kv};
use crate::{Error, GroupAddress, InterfaceId, MembershipNotification, Result};

/// Router-side state of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterGroupState {
    NoMembersPresent,
    MembersPresent,
    CheckingMembership,
}

/// Router membership record for one (interface, group)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterGroupMembership {
    pub group: GroupAddress,
    pub state: RouterGroupState,
    /// Deadline of the membership timeout
    pub membership_timer: Option<Instant>,
    /// Deadline of the last-member query retransmission
    pub retransmit_timer: Option<Instant>,
}

impl RouterGroupMembership {
    fn new(group: GroupAddress) -> Self {
        Self {
            group,
            state: RouterGroupState::NoMembersPresent,
            membership_timer: None,
            retransmit_timer: None,
        }
    }
}

/// Router membership engine
#[derive(Debug)]
pub struct RouterEngine {
    interfaces: HashMap<InterfaceId, BTreeMap<GroupAddress, RouterGroupMembership>>,
    timers: IgmpTimers,
    logger: Logger,
}

impl RouterEngine {
    pub fn new(timers: IgmpTimers, logger: Logger) -> Self {
        Self {
            interfaces: HashMap::new(),
            timers,
            logger,
        }
    }

    /// A Report for `group` arrived on `iface`
    ///
    /// A Report always returns the record to `MembersPresent`, ending any
    /// in-progress last-member check along with its retransmissions.
    pub fn report_received(
        &mut self,
        iface: &InterfaceInfo,
        group: GroupAddress,
        forwarding: bool,
        now: Instant,
    ) -> Actions {
        let mut actions = Actions::new();
        if !forwarding || group.is_reserved() {
            return actions;
        }

        let record = self
            .interfaces
            .entry(iface.id)
            .or_default()
            .entry(group)
            .or_insert_with(|| RouterGroupMembership::new(group));

        if record.state == RouterGroupState::NoMembersPresent {
            actions.add_listener(ListenerAction::Add {
                interface: iface.id,
                group,
            });
            actions.notify(MembershipNotification::GroupRegistered {
                interface: iface.id,
                group,
            });
            let group_name = group.to_string();
            log_kv!(
                self.logger,
                Severity::Info,
                Facility::Router,
                "Group registered",
                "iface" => iface.name.as_str(),
                "group" => group_name.as_str()
            );
        }

        if record.retransmit_timer.take().is_some() {
            actions.add_timer(TimerRequest::Cancel {
                kind: retransmit_timer_kind(iface.id, group),
            });
        }

        let fire_at = now + self.timers.group_membership_interval;
        record.membership_timer = Some(fire_at);
        actions.add_timer(TimerRequest::Start {
            kind: membership_timer_kind(iface.id, group),
            fire_at,
        });
        record.state = RouterGroupState::MembersPresent;
        actions
    }

    /// A Leave for `group` arrived on `iface`
    ///
    /// Only a record in `MembersPresent` reacts. As querier the membership
    /// timer is cut to the last-member query time and a group-specific Query
    /// goes out. Otherwise the Query is sized from `max_resp` scaled by the
    /// last-member query count, and the membership timer is left alone.
    pub fn leave_received(
        &mut self,
        iface: &InterfaceInfo,
        group: GroupAddress,
        max_resp: Duration,
        forwarding: bool,
        is_querier: bool,
        now: Instant,
    ) -> Actions {
        let mut actions = Actions::new();
        if !forwarding {
            return actions;
        }
        let Some(record) = self
            .interfaces
            .get_mut(&iface.id)
            .and_then(|groups| groups.get_mut(&group))
        else {
            return actions;
        };
        if record.state != RouterGroupState::MembersPresent {
            return actions;
        }

        let lmqi = self.timers.last_member_query_interval;
        arm_retransmit_timer(record, iface.id, now + lmqi, &mut actions);

        let query = if is_querier {
            let fire_at = now + self.timers.last_member_query_time();
            record.membership_timer = Some(fire_at);
            actions.add_timer(TimerRequest::Start {
                kind: membership_timer_kind(iface.id, group),
                fire_at,
            });
            IgmpMessage::group_query(group, lmqi)
        } else {
            IgmpMessage::group_query(group, max_resp * self.timers.last_member_query_count)
        };
        actions.send(OutgoingMessage::query(iface.id, query));

        record.state = RouterGroupState::CheckingMembership;
        log_debug!(
            self.logger,
            Facility::Router,
            "Checking membership of {} on {}",
            group,
            iface.name
        );
        actions
    }

    /// The membership timer for (`iface`, `group`) expired
    ///
    /// Destroys the record, then announces the group is gone.
    pub fn membership_timer_fired(&mut self, iface: &InterfaceInfo, group: GroupAddress) -> Result<Actions> {
        let groups = self.interfaces.get_mut(&iface.id);
        let record = groups
            .and_then(|groups| groups.remove(&group))
            .ok_or_else(|| missing_record("membership", iface.id, group))?;

        if self
            .interfaces
            .get(&iface.id)
            .is_some_and(BTreeMap::is_empty)
        {
            self.interfaces.remove(&iface.id);
        }

        let mut actions = Actions::new();
        if record.retransmit_timer.is_some() {
            actions.add_timer(TimerRequest::Cancel {
                kind: retransmit_timer_kind(iface.id, group),
            });
        }
        actions.notify(MembershipNotification::GroupUnregistered {
            interface: iface.id,
            group,
        });
        actions.add_listener(ListenerAction::Remove {
            interface: iface.id,
            group,
        });

        let group_name = group.to_string();
        log_kv!(
            self.logger,
            Severity::Info,
            Facility::Router,
            "Group expired",
            "iface" => iface.name.as_str(),
            "group" => group_name.as_str()
        );
        Ok(actions)
    }

    /// The retransmit timer for (`iface`, `group`) expired
    pub fn retransmit_timer_fired(
        &mut self,
        iface: &InterfaceInfo,
        group: GroupAddress,
        now: Instant,
    ) -> Result<Actions> {
        let record = self
            .interfaces
            .get_mut(&iface.id)
            .and_then(|groups| groups.get_mut(&group))
            .ok_or_else(|| missing_record("retransmit", iface.id, group))?;

        let lmqi = self.timers.last_member_query_interval;
        let mut actions = Actions::new();
        actions.send(OutgoingMessage::query(
            iface.id,
            IgmpMessage::group_query(group, lmqi),
        ));
        arm_retransmit_timer(record, iface.id, now + lmqi, &mut actions);
        record.state = RouterGroupState::CheckingMembership;
        Ok(actions)
    }

    /// Drop every record on an interface, cancelling their timers
    ///
    /// No notifications are published; the interface itself is gone.
    pub fn remove_interface(&mut self, interface: InterfaceId) -> Actions {
        let mut actions = Actions::new();
        let records = self
            .interfaces
            .remove(&interface)
            .into_iter()
            .flat_map(BTreeMap::into_values);
        for record in records {
            if record.membership_timer.is_some() {
                actions.add_timer(TimerRequest::Cancel {
                    kind: membership_timer_kind(interface, record.group),
                });
            }
            if record.retransmit_timer.is_some() {
                actions.add_timer(TimerRequest::Cancel {
                    kind: retransmit_timer_kind(interface, record.group),
                });
            }
        }
        actions
    }

    pub fn membership(&self, interface: InterfaceId, group: GroupAddress) -> Option<&RouterGroupMembership> {
        self.interfaces.get(&interface)?.get(&group)
    }

    /// Groups with members present on an interface, in address order
    pub fn groups(&self, interface: InterfaceId) -> Vec<GroupAddress> {
        self.interfaces
            .get(&interface)
            .map(|groups| groups.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of (interface, group) records
    pub fn group_count(&self) -> usize {
        self.interfaces.values().map(BTreeMap::len).sum()
    }
}

fn membership_timer_kind(interface: InterfaceId, group: GroupAddress) -> TimerKind {
    TimerKind::MembershipExpiry { interface, group }
}

fn retransmit_timer_kind(interface: InterfaceId, group: GroupAddress) -> TimerKind {
    TimerKind::Retransmit { interface, group }
}

fn arm_retransmit_timer(
    record: &mut RouterGroupMembership,
    interface: InterfaceId,
    fire_at: Instant,
    actions: &mut Actions,
) {
    record.retransmit_timer = Some(fire_at);
    actions.add_timer(TimerRequest::Start {
        kind: retransmit_timer_kind(interface, record.group),
        fire_at,
    });
}

fn missing_record(timer: &str, interface: InterfaceId, group: GroupAddress) -> Error {
    Error::Invariant(format!(
        "{} timer fired for {} on {} without a router record",
        timer, group, interface
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface() -> InterfaceInfo {
        InterfaceInfo::new(InterfaceId(1), "eth0", "10.0.0.1".parse().unwrap())
    }

    fn group() -> GroupAddress {
        "239.1.1.1".parse().unwrap()
    }

    fn engine() -> RouterEngine {
        RouterEngine::new(IgmpTimers::default(), Logger::null())
    }

    fn start_deadline(actions: &Actions, wanted: TimerKind) -> Option<Instant> {
        actions.timers.iter().find_map(|timer| match timer {
            TimerRequest::Start { kind, fire_at } if *kind == wanted => Some(*fire_at),
            _ => None,
        })
    }

    #[test]
    fn test_first_report_registers_group() {
        let mut engine = engine();
        let now = Instant::now();

        let actions = engine.report_received(&iface(), group(), true, now);

        assert_eq!(
            actions.notifications,
            vec![MembershipNotification::GroupRegistered {
                interface: InterfaceId(1),
                group: group()
            }]
        );
        assert_eq!(
            actions.listeners,
            vec![ListenerAction::Add {
                interface: InterfaceId(1),
                group: group()
            }]
        );
        assert_eq!(
            start_deadline(&actions, membership_timer_kind(InterfaceId(1), group())),
            Some(now + Duration::from_secs(260))
        );
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().state,
            RouterGroupState::MembersPresent
        );
    }

    #[test]
    fn test_registration_logged_with_group() {
        let (logger, sink) = Logger::memory();
        let mut engine = RouterEngine::new(IgmpTimers::default(), logger);

        engine.report_received(&iface(), group(), true, Instant::now());

        let entry = sink
            .entries()
            .into_iter()
            .find(|entry| entry.message == "Group registered")
            .unwrap();
        assert!(entry
            .kvs
            .contains(&("group".to_string(), "239.1.1.1".to_string())));
    }

    #[test]
    fn test_repeat_report_only_refreshes_timer() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);

        let later = now + Duration::from_secs(30);
        let actions = engine.report_received(&iface(), group(), true, later);

        assert!(actions.notifications.is_empty());
        assert!(actions.listeners.is_empty());
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().membership_timer,
            Some(later + Duration::from_secs(260))
        );
    }

    #[test]
    fn test_report_ignored_without_forwarding() {
        let mut engine = engine();
        let actions = engine.report_received(&iface(), group(), false, Instant::now());
        assert!(actions.is_empty());
        assert_eq!(engine.group_count(), 0);
    }

    #[test]
    fn test_leave_as_querier() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);

        let actions = engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        assert_eq!(
            start_deadline(&actions, retransmit_timer_kind(InterfaceId(1), group())),
            Some(now + Duration::from_secs(1))
        );
        assert_eq!(
            start_deadline(&actions, membership_timer_kind(InterfaceId(1), group())),
            Some(now + Duration::from_secs(2))
        );
        assert_eq!(actions.packets.len(), 1);
        assert_eq!(
            actions.packets[0].message,
            IgmpMessage::Query {
                group: Some(group()),
                max_resp_time: 10
            }
        );
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().state,
            RouterGroupState::CheckingMembership
        );
    }

    #[test]
    fn test_leave_as_non_querier_keeps_membership_timer() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);

        let actions = engine.leave_received(
            &iface(),
            group(),
            Duration::from_secs(1),
            true,
            false,
            now,
        );

        assert!(start_deadline(&actions, membership_timer_kind(InterfaceId(1), group())).is_none());
        assert_eq!(
            actions.packets[0].message,
            IgmpMessage::Query {
                group: Some(group()),
                max_resp_time: 20
            }
        );
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().membership_timer,
            Some(now + Duration::from_secs(260))
        );
    }

    #[test]
    fn test_leave_for_unknown_group_ignored() {
        let mut engine = engine();
        let actions = engine.leave_received(&iface(), group(), Duration::ZERO, true, true, Instant::now());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_leave_while_checking_ignored() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);
        engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        let actions = engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_report_during_check_stops_retransmissions() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);
        engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        let actions = engine.report_received(&iface(), group(), true, now);

        assert!(actions.timers.contains(&TimerRequest::Cancel {
            kind: retransmit_timer_kind(InterfaceId(1), group())
        }));
        assert!(actions.notifications.is_empty());
        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, RouterGroupState::MembersPresent);
        assert!(record.retransmit_timer.is_none());
        assert_eq!(
            record.membership_timer,
            Some(now + Duration::from_secs(260))
        );
    }

    #[test]
    fn test_membership_expiry_destroys_record() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);
        engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        let actions = engine.membership_timer_fired(&iface(), group()).unwrap();

        assert!(engine.membership(InterfaceId(1), group()).is_none());
        assert_eq!(
            actions.timers,
            vec![TimerRequest::Cancel {
                kind: retransmit_timer_kind(InterfaceId(1), group())
            }]
        );
        assert_eq!(
            actions.notifications,
            vec![MembershipNotification::GroupUnregistered {
                interface: InterfaceId(1),
                group: group()
            }]
        );
        assert_eq!(
            actions.listeners,
            vec![ListenerAction::Remove {
                interface: InterfaceId(1),
                group: group()
            }]
        );
    }

    #[test]
    fn test_expiry_without_record_is_invariant_error() {
        let mut engine = engine();
        assert!(matches!(
            engine.membership_timer_fired(&iface(), group()),
            Err(Error::Invariant(_))
        ));
        assert!(matches!(
            engine.retransmit_timer_fired(&iface(), group(), Instant::now()),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn test_retransmit_sends_query_and_rearms() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);
        engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        let later = now + Duration::from_secs(1);
        let actions = engine.retransmit_timer_fired(&iface(), group(), later).unwrap();

        assert_eq!(actions.packets.len(), 1);
        assert_eq!(
            start_deadline(&actions, retransmit_timer_kind(InterfaceId(1), group())),
            Some(later + Duration::from_secs(1))
        );
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().state,
            RouterGroupState::CheckingMembership
        );
    }

    #[test]
    fn test_remove_interface_cancels_both_timers() {
        let mut engine = engine();
        let now = Instant::now();
        engine.report_received(&iface(), group(), true, now);
        engine.leave_received(&iface(), group(), Duration::ZERO, true, true, now);

        let actions = engine.remove_interface(InterfaceId(1));

        assert_eq!(actions.timers.len(), 2);
        assert!(actions.notifications.is_empty());
        assert_eq!(engine.group_count(), 0);
    }
}
