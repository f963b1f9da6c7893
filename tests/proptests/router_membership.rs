//! Property-based tests for router membership through the node
//!
//! Reports, leaves and the passage of time arrive in arbitrary order. The
//! router's records, the timer queue and the interface listener set must
//! always agree with each other.

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use igmp_membership::logging::Logger;
    use igmp_membership::node::{EventSubscriptionManager, IgmpNode};
    use igmp_membership::protocols::message::IgmpMessage;
    use igmp_membership::protocols::router::RouterGroupState;
    use igmp_membership::protocols::TimerKind;
    use igmp_membership::registry::{InterfaceInfo, InterfaceRegistry, StaticRegistry};
    use igmp_membership::{Config, GroupAddress, InterfaceId, MembershipNotification};
    use proptest::prelude::*;

    const ETH0: InterfaceId = InterfaceId(1);
    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);

    #[derive(Debug, Clone)]
    enum Op {
        Report(usize),
        Leave(usize),
        Advance(u16),
    }

    fn groups() -> Vec<GroupAddress> {
        vec![
            "239.1.1.1".parse().unwrap(),
            "239.1.1.2".parse().unwrap(),
            "232.0.0.5".parse().unwrap(),
        ]
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3).prop_map(Op::Report),
            (0usize..3).prop_map(Op::Leave),
            (0u16..300).prop_map(Op::Advance),
        ]
    }

    fn router() -> IgmpNode {
        let registry = StaticRegistry::new(true).with_interface(InterfaceInfo::new(
            ETH0,
            "eth0",
            Ipv4Addr::new(10, 0, 0, 1),
        ));
        let config = Config {
            multicast_forwarding: true,
            ..Config::default()
        };
        IgmpNode::new(config, registry, EventSubscriptionManager::default(), Logger::null()).unwrap()
    }

    proptest! {
        #[test]
        fn records_timers_and_listeners_agree(ops in proptest::collection::vec(op(), 1..80)) {
            let groups = groups();
            let mut node = router();
            let mut events = node.subscribe();
            let mut now = Instant::now();
            node.start(now).unwrap();
            let mut registered = 0i64;

            for op in ops {
                match op {
                    Op::Report(g) => {
                        let data = IgmpMessage::Report { group: groups[g] }.encode();
                        node.receive(ETH0, HOST, &data, now).unwrap();
                    }
                    Op::Leave(g) => {
                        let data = IgmpMessage::Leave { group: groups[g] }.encode();
                        node.receive(ETH0, HOST, &data, now).unwrap();
                    }
                    Op::Advance(secs) => {
                        now += Duration::from_secs(secs as u64);
                        node.fire_due_timers(now).unwrap();
                    }
                }
                node.take_outgoing();

                while let Ok(event) = events.try_recv() {
                    match event {
                        MembershipNotification::GroupRegistered { .. } => registered += 1,
                        MembershipNotification::GroupUnregistered { .. } => registered -= 1,
                    }
                }

                let listeners = node.registry().multicast_listeners(ETH0);
                prop_assert_eq!(&listeners, &node.router().groups(ETH0));
                prop_assert_eq!(registered, listeners.len() as i64);

                for group in &groups {
                    let membership = TimerKind::MembershipExpiry { interface: ETH0, group: *group };
                    let retransmit = TimerKind::Retransmit { interface: ETH0, group: *group };
                    let queue = node.timer_queue();
                    match node.router().membership(ETH0, *group) {
                        Some(record) => {
                            prop_assert_ne!(record.state, RouterGroupState::NoMembersPresent);
                            prop_assert_eq!(record.membership_timer, queue.deadline(&membership));
                            prop_assert!(record.membership_timer.is_some());
                            prop_assert_eq!(record.retransmit_timer, queue.deadline(&retransmit));
                            if record.state == RouterGroupState::MembersPresent {
                                prop_assert!(record.retransmit_timer.is_none());
                            }
                        }
                        None => {
                            prop_assert!(!queue.is_armed(&membership));
                            prop_assert!(!queue.is_armed(&retransmit));
                        }
                    }
                }
            }
        }
    }
}
