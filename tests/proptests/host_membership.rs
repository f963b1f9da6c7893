//! Property-based tests for the host membership engine
//!
//! Arbitrary interleavings of joins, leaves, queries and timer expiries must
//! keep the records in step with what the application asked for.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use igmp_membership::logging::Logger;
    use igmp_membership::protocols::host::{HostEngine, HostGroupState};
    use igmp_membership::protocols::message::IgmpMessage;
    use igmp_membership::registry::InterfaceInfo;
    use igmp_membership::{GroupAddress, InterfaceId};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Join(usize),
        Leave(usize),
        GeneralQuery(u8),
        GroupQuery(usize, u8),
        OverheardReport(usize),
        Expire(usize),
    }

    fn pool() -> Vec<GroupAddress> {
        vec![
            GroupAddress::ALL_HOSTS,
            "239.1.1.1".parse().unwrap(),
            "239.1.1.2".parse().unwrap(),
            "225.0.0.9".parse().unwrap(),
        ]
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4).prop_map(Op::Join),
            (0usize..4).prop_map(Op::Leave),
            any::<u8>().prop_map(Op::GeneralQuery),
            (0usize..4, any::<u8>()).prop_map(|(g, t)| Op::GroupQuery(g, t)),
            (0usize..4).prop_map(Op::OverheardReport),
            (0usize..4).prop_map(Op::Expire),
        ]
    }

    fn iface() -> InterfaceInfo {
        InterfaceInfo::new(InterfaceId(1), "eth0", Ipv4Addr::new(10, 0, 0, 1))
    }

    proptest! {
        #[test]
        fn records_follow_joins_and_leaves(ops in proptest::collection::vec(op(), 1..60), seed in any::<u64>()) {
            let groups = pool();
            let iface = iface();
            let mut engine = HostEngine::new(Duration::from_secs(10), Logger::null());
            engine.reseed(seed);
            let now = Instant::now();
            let mut joined = BTreeSet::new();

            for op in ops {
                match op {
                    Op::Join(g) => {
                        let actions = engine.join_group(&iface, groups[g], true, now);
                        if !groups[g].is_reserved() && joined.insert(groups[g]) {
                            prop_assert_eq!(actions.packets.len(), 1);
                        } else {
                            prop_assert!(actions.packets.is_empty());
                        }
                    }
                    Op::Leave(g) => {
                        let actions = engine.leave_group(&iface, groups[g], true);
                        prop_assert!(engine.membership(iface.id, groups[g]).is_none());
                        for packet in &actions.packets {
                            prop_assert_eq!(&packet.message, &IgmpMessage::Leave { group: groups[g] });
                        }
                        joined.remove(&groups[g]);
                    }
                    Op::GeneralQuery(tenths) => {
                        engine.query_received(&iface, None, Duration::from_millis(tenths as u64 * 100), now);
                    }
                    Op::GroupQuery(g, tenths) => {
                        engine.query_received(&iface, Some(groups[g]), Duration::from_millis(tenths as u64 * 100), now);
                    }
                    Op::OverheardReport(g) => {
                        let actions = engine.report_received(&iface, groups[g]);
                        prop_assert!(actions.packets.is_empty());
                    }
                    Op::Expire(g) => {
                        let armed = engine
                            .membership(iface.id, groups[g])
                            .is_some_and(|record| record.response_timer.is_some());
                        if armed {
                            let actions = engine.response_timer_fired(&iface, groups[g]).unwrap();
                            prop_assert_eq!(actions.packets.len(), 1);
                        }
                    }
                }

                let recorded: BTreeSet<GroupAddress> = engine.groups(iface.id).into_iter().collect();
                prop_assert_eq!(&recorded, &joined);
                for group in &recorded {
                    let record = engine.membership(iface.id, *group).unwrap();
                    prop_assert_ne!(record.state, HostGroupState::NonMember);
                    if record.response_timer.is_some() {
                        prop_assert_eq!(record.state, HostGroupState::DelayingMember);
                    }
                    if record.state == HostGroupState::IdleMember {
                        prop_assert!(record.last_reporter);
                    }
                }
            }
        }

        #[test]
        fn response_delay_bounded_by_max_resp(tenths in 0u8..=255, seed in any::<u64>()) {
            let group: GroupAddress = "239.1.1.1".parse().unwrap();
            let iface = iface();
            let mut engine = HostEngine::new(Duration::from_secs(10), Logger::null());
            engine.reseed(seed);
            let now = Instant::now();
            engine.join_group(&iface, group, true, now);
            engine.response_timer_fired(&iface, group).unwrap();

            let max_resp = Duration::from_millis(tenths as u64 * 100);
            engine.query_received(&iface, None, max_resp, now);

            let record = engine.membership(iface.id, group).unwrap();
            prop_assert_eq!(record.state, HostGroupState::DelayingMember);
            let deadline = record.response_timer.unwrap();
            prop_assert!(deadline >= now);
            prop_assert!(deadline <= now + max_resp);
        }
    }
}
