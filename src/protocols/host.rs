// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Host membership engine
//!
//! One state machine per (interface, group) the local host has joined:
//!
//! ```text
//!              join (report sent)
//!  NonMember ─────────────────────▶ DelayingMember ◀──┐
//!                                    │    ▲           │ query
//!                   response timer   │    │ overheard │
//!                   (report sent)    ▼    │ report    │
//!                                  IdleMember ────────┘
//! ```
//!
//! A leave from any state destroys the record, sending a Leave first if this
//! host was the last to report the group.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{TimerKind, TimerRequest};
use crate::logging::{Facility, Logger};
use crate::node::actions::{Actions, OutgoingMessage};
use crate::registry::InterfaceInfo;
use crate::{log_debug, log_info};
use crate::{Error, GroupAddress, InterfaceId, Result};

/// Host-side state of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostGroupState {
    NonMember,
    DelayingMember,
    IdleMember,
}

/// Host membership record for one (interface, group)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGroupMembership {
    pub group: GroupAddress,
    pub state: HostGroupState,
    /// Set when this host sent the most recent Report for the group
    pub last_reporter: bool,
    /// Deadline of the response timer while it is armed
    pub response_timer: Option<Instant>,
}

impl HostGroupMembership {
    fn new(group: GroupAddress) -> Self {
        Self {
            group,
            state: HostGroupState::NonMember,
            last_reporter: false,
            response_timer: None,
        }
    }
}

/// Host membership engine
#[derive(Debug)]
pub struct HostEngine {
    interfaces: HashMap<InterfaceId, BTreeMap<GroupAddress, HostGroupMembership>>,
    unsolicited_report_interval: Duration,
    rng: StdRng,
    logger: Logger,
}

impl HostEngine {
    pub fn new(unsolicited_report_interval: Duration, logger: Logger) -> Self {
        Self {
            interfaces: HashMap::new(),
            unsolicited_report_interval,
            rng: StdRng::from_entropy(),
            logger,
        }
    }

    /// Replace the random source, for reproducible runs
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Local application joined `group` on `iface`
    ///
    /// Joining a group already joined is a no-op. The reserved all-hosts and
    /// all-routers groups never get a record.
    pub fn join_group(
        &mut self,
        iface: &InterfaceInfo,
        group: GroupAddress,
        enabled: bool,
        now: Instant,
    ) -> Actions {
        let mut actions = Actions::new();
        if group.is_reserved() {
            return actions;
        }

        let groups = self.interfaces.entry(iface.id).or_default();
        if groups.contains_key(&group) {
            log_debug!(
                self.logger,
                Facility::Host,
                "{} already joined on {}",
                group,
                iface.name
            );
            return actions;
        }
        let mut record = HostGroupMembership::new(group);

        if enabled {
            if !iface.loopback {
                actions.send(OutgoingMessage::report(iface.id, group));
            }
            record.last_reporter = true;
            let delay = random_delay(&mut self.rng, self.unsolicited_report_interval);
            arm_response_timer(&mut record, iface.id, now + delay, &mut actions);
            record.state = HostGroupState::DelayingMember;
        }

        log_info!(self.logger, Facility::Host, "Joined {} on {}", group, iface.name);
        groups.insert(group, record);
        actions
    }

    /// Local application left `group` on `iface`; a no-op if not joined
    pub fn leave_group(&mut self, iface: &InterfaceInfo, group: GroupAddress, enabled: bool) -> Actions {
        let mut actions = Actions::new();
        let Some(groups) = self.interfaces.get_mut(&iface.id) else {
            return actions;
        };
        let Some(record) = groups.remove(&group) else {
            return actions;
        };

        if record.response_timer.is_some() {
            actions.add_timer(TimerRequest::Cancel {
                kind: response_timer_kind(iface.id, group),
            });
        }
        if enabled && record.last_reporter && !iface.loopback {
            actions.send(OutgoingMessage::leave(iface.id, group));
        }
        if groups.is_empty() {
            self.interfaces.remove(&iface.id);
        }

        log_info!(self.logger, Facility::Host, "Left {} on {}", group, iface.name);
        actions
    }

    /// A Query arrived on `iface`
    ///
    /// `group` is `None` for a General Query, which applies to every group
    /// joined on the interface.
    pub fn query_received(
        &mut self,
        iface: &InterfaceInfo,
        group: Option<GroupAddress>,
        max_resp: Duration,
        now: Instant,
    ) -> Actions {
        let mut actions = Actions::new();
        let Some(groups) = self.interfaces.get_mut(&iface.id) else {
            return actions;
        };

        let targets: Vec<GroupAddress> = match group {
            None => groups.keys().copied().collect(),
            Some(group) if groups.contains_key(&group) => vec![group],
            Some(_) => return actions,
        };

        for target in targets {
            let Some(record) = groups.get_mut(&target) else {
                continue;
            };
            match record.state {
                HostGroupState::DelayingMember => {
                    // Only a strictly tighter deadline moves a pending timer.
                    // A member silenced by an overheard report has none and
                    // answers this query.
                    let rearm = record
                        .response_timer
                        .map_or(true, |deadline| now + max_resp < deadline);
                    if rearm {
                        let delay = random_delay(&mut self.rng, max_resp);
                        arm_response_timer(record, iface.id, now + delay, &mut actions);
                    }
                }
                HostGroupState::IdleMember => {
                    let delay = random_delay(&mut self.rng, max_resp);
                    arm_response_timer(record, iface.id, now + delay, &mut actions);
                    record.state = HostGroupState::DelayingMember;
                }
                HostGroupState::NonMember => {}
            }
        }
        actions
    }

    /// The response timer for (`iface`, `group`) expired
    pub fn response_timer_fired(&mut self, iface: &InterfaceInfo, group: GroupAddress) -> Result<Actions> {
        let record = self
            .interfaces
            .get_mut(&iface.id)
            .and_then(|groups| groups.get_mut(&group))
            .ok_or_else(|| {
                Error::Invariant(format!(
                    "host response timer fired for {} on {} without a record",
                    group, iface.id
                ))
            })?;

        let mut actions = Actions::new();
        if !iface.loopback {
            actions.send(OutgoingMessage::report(iface.id, group));
        }
        record.last_reporter = true;
        record.response_timer = None;
        record.state = HostGroupState::IdleMember;
        Ok(actions)
    }

    /// Another host's Report for `group` was overheard on `iface`
    ///
    /// An idle member forgets it was the last reporter and returns to the
    /// delaying state with no timer armed; the next query arms one.
    pub fn report_received(&mut self, iface: &InterfaceInfo, group: GroupAddress) -> Actions {
        let mut actions = Actions::new();
        let Some(record) = self
            .interfaces
            .get_mut(&iface.id)
            .and_then(|groups| groups.get_mut(&group))
        else {
            return actions;
        };

        if record.state == HostGroupState::IdleMember {
            if record.response_timer.take().is_some() {
                actions.add_timer(TimerRequest::Cancel {
                    kind: response_timer_kind(iface.id, group),
                });
            }
            record.last_reporter = false;
            record.state = HostGroupState::DelayingMember;
        }
        actions
    }

    /// Drop every record on an interface, cancelling their timers
    pub fn remove_interface(&mut self, interface: InterfaceId) -> Actions {
        let mut actions = Actions::new();
        let records = self
            .interfaces
            .remove(&interface)
            .into_iter()
            .flat_map(BTreeMap::into_values);
        for record in records {
            if record.response_timer.is_some() {
                actions.add_timer(TimerRequest::Cancel {
                    kind: response_timer_kind(interface, record.group),
                });
            }
        }
        actions
    }

    pub fn membership(&self, interface: InterfaceId, group: GroupAddress) -> Option<&HostGroupMembership> {
        self.interfaces.get(&interface)?.get(&group)
    }

    /// Groups joined on an interface, in address order
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

fn response_timer_kind(interface: InterfaceId, group: GroupAddress) -> TimerKind {
    TimerKind::HostResponse { interface, group }
}

fn arm_response_timer(
    record: &mut HostGroupMembership,
    interface: InterfaceId,
    fire_at: Instant,
    actions: &mut Actions,
) {
    record.response_timer = Some(fire_at);
    actions.add_timer(TimerRequest::Start {
        kind: response_timer_kind(interface, record.group),
        fire_at,
    });
}

/// Uniform delay in `[0, max)`
fn random_delay(rng: &mut StdRng, max: Duration) -> Duration {
    max.mul_f64(rng.gen::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::message::IgmpMessage;

    fn iface() -> InterfaceInfo {
        InterfaceInfo::new(InterfaceId(1), "eth0", "10.0.0.5".parse().unwrap())
    }

    fn group() -> GroupAddress {
        "239.1.1.1".parse().unwrap()
    }

    fn engine() -> HostEngine {
        let mut engine = HostEngine::new(Duration::from_secs(10), Logger::null());
        engine.reseed(7);
        engine
    }

    fn armed_deadline(actions: &Actions) -> Option<Instant> {
        actions.timers.iter().find_map(|timer| match timer {
            TimerRequest::Start { fire_at, .. } => Some(*fire_at),
            TimerRequest::Cancel { .. } => None,
        })
    }

    #[test]
    fn test_join_sends_report_and_delays() {
        let mut engine = engine();
        let now = Instant::now();

        let actions = engine.join_group(&iface(), group(), true, now);

        assert_eq!(actions.packets.len(), 1);
        assert_eq!(actions.packets[0].message, IgmpMessage::Report { group: group() });
        let deadline = armed_deadline(&actions).unwrap();
        assert!(deadline <= now + Duration::from_secs(10));

        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, HostGroupState::DelayingMember);
        assert!(record.last_reporter);
        assert_eq!(record.response_timer, Some(deadline));
    }

    #[test]
    fn test_join_twice_is_noop() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);

        let actions = engine.join_group(&iface(), group(), true, now);
        assert!(actions.is_empty());
        assert_eq!(engine.group_count(), 1);
    }

    #[test]
    fn test_reserved_groups_never_create_records() {
        let mut engine = engine();
        let now = Instant::now();

        assert!(engine
            .join_group(&iface(), GroupAddress::ALL_HOSTS, true, now)
            .is_empty());
        assert!(engine
            .join_group(&iface(), GroupAddress::ALL_ROUTERS, true, now)
            .is_empty());
        assert_eq!(engine.group_count(), 0);
    }

    #[test]
    fn test_join_while_disabled_creates_non_member() {
        let mut engine = engine();
        let actions = engine.join_group(&iface(), group(), false, Instant::now());

        assert!(actions.is_empty());
        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, HostGroupState::NonMember);
        assert!(!record.last_reporter);
    }

    #[test]
    fn test_leave_as_last_reporter_sends_leave() {
        let mut engine = engine();
        engine.join_group(&iface(), group(), true, Instant::now());

        let actions = engine.leave_group(&iface(), group(), true);

        assert_eq!(actions.timers.len(), 1);
        assert!(matches!(actions.timers[0], TimerRequest::Cancel { .. }));
        assert_eq!(actions.packets.len(), 1);
        assert_eq!(actions.packets[0].destination, GroupAddress::ALL_ROUTERS.addr());
        assert!(engine.membership(InterfaceId(1), group()).is_none());
    }

    #[test]
    fn test_leave_unknown_group_is_noop() {
        let mut engine = engine();
        assert!(engine.leave_group(&iface(), group(), true).is_empty());
    }

    #[test]
    fn test_timer_fired_moves_to_idle() {
        let mut engine = engine();
        engine.join_group(&iface(), group(), true, Instant::now());

        let actions = engine.response_timer_fired(&iface(), group()).unwrap();

        assert_eq!(actions.packets.len(), 1);
        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, HostGroupState::IdleMember);
        assert!(record.last_reporter);
        assert!(record.response_timer.is_none());
    }

    #[test]
    fn test_timer_fired_without_record_is_invariant_error() {
        let mut engine = engine();
        let result = engine.response_timer_fired(&iface(), group());
        assert!(matches!(result, Err(Error::Invariant(_))));
    }

    #[test]
    fn test_idle_member_answers_general_query() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        engine.response_timer_fired(&iface(), group()).unwrap();

        let actions = engine.query_received(&iface(), None, Duration::from_secs(10), now);

        let deadline = armed_deadline(&actions).unwrap();
        assert!(deadline <= now + Duration::from_secs(10));
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().state,
            HostGroupState::DelayingMember
        );
    }

    #[test]
    fn test_delaying_member_keeps_earlier_timer() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        let before = engine.membership(InterfaceId(1), group()).unwrap().response_timer;

        // now + 20s is never earlier than a deadline within 10s
        let actions = engine.query_received(&iface(), None, Duration::from_secs(20), now);

        assert!(actions.is_empty());
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().response_timer,
            before
        );
    }

    #[test]
    fn test_delaying_member_takes_tighter_deadline() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        let before = engine
            .membership(InterfaceId(1), group())
            .unwrap()
            .response_timer
            .unwrap();

        // A zero max response time is tighter than any pending deadline
        // unless that deadline is already `now`
        let actions = engine.query_received(&iface(), Some(group()), Duration::ZERO, now);
        if before > now {
            assert_eq!(armed_deadline(&actions), Some(now));
        } else {
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn test_group_query_for_other_group_ignored() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        engine.response_timer_fired(&iface(), group()).unwrap();

        let other: GroupAddress = "239.2.2.2".parse().unwrap();
        let actions = engine.query_received(&iface(), Some(other), Duration::from_secs(10), now);

        assert!(actions.is_empty());
        assert_eq!(
            engine.membership(InterfaceId(1), group()).unwrap().state,
            HostGroupState::IdleMember
        );
    }

    #[test]
    fn test_overheard_report_clears_last_reporter() {
        let mut engine = engine();
        engine.join_group(&iface(), group(), true, Instant::now());
        engine.response_timer_fired(&iface(), group()).unwrap();

        engine.report_received(&iface(), group());

        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, HostGroupState::DelayingMember);
        assert!(!record.last_reporter);
        assert!(record.response_timer.is_none());

        // No longer the last reporter, so leaving is silent
        let actions = engine.leave_group(&iface(), group(), true);
        assert!(actions.packets.is_empty());
    }

    #[test]
    fn test_silenced_member_answers_next_query() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        engine.response_timer_fired(&iface(), group()).unwrap();
        engine.report_received(&iface(), group());

        let actions = engine.query_received(&iface(), None, Duration::from_secs(10), now);

        let deadline = armed_deadline(&actions).unwrap();
        assert!(deadline <= now + Duration::from_secs(10));
        let record = engine.membership(InterfaceId(1), group()).unwrap();
        assert_eq!(record.state, HostGroupState::DelayingMember);
        assert_eq!(record.response_timer, Some(deadline));
    }

    #[test]
    fn test_loopback_sends_nothing() {
        let mut engine = engine();
        let lo = InterfaceInfo::new(InterfaceId(9), "lo", "127.0.0.1".parse().unwrap()).loopback(true);

        let actions = engine.join_group(&lo, group(), true, Instant::now());
        assert!(actions.packets.is_empty());
        assert_eq!(actions.timers.len(), 1);

        let actions = engine.response_timer_fired(&lo, group()).unwrap();
        assert!(actions.packets.is_empty());

        let actions = engine.leave_group(&lo, group(), true);
        assert!(actions.packets.is_empty());
    }

    #[test]
    fn test_remove_interface_cancels_timers() {
        let mut engine = engine();
        let now = Instant::now();
        engine.join_group(&iface(), group(), true, now);
        engine.join_group(&iface(), "239.3.3.3".parse().unwrap(), true, now);

        let actions = engine.remove_interface(InterfaceId(1));

        assert_eq!(actions.timers.len(), 2);
        assert!(actions.packets.is_empty());
        assert_eq!(engine.group_count(), 0);
    }
}
