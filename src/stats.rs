// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Per-node protocol counters
//!
//! The node owns one [`IgmpStats`] and updates it as messages pass through
//! the dispatcher. Nothing here is global: [`IgmpStats::publish`] copies a
//! snapshot into the `metrics` facade when the embedding program wants it.

use metrics::{describe_gauge, gauge};
use serde::Serialize;

use crate::protocols::message::IgmpMessage;

/// Message and group counters for one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IgmpStats {
    pub queries_sent: u64,
    pub general_queries_sent: u64,
    pub group_specific_queries_sent: u64,
    pub reports_sent: u64,
    pub leaves_sent: u64,

    pub queries_received: u64,
    pub general_queries_received: u64,
    pub group_specific_queries_received: u64,
    pub reports_received: u64,
    pub leaves_received: u64,

    /// Inbound packets dropped because they failed to decode
    pub malformed_received: u64,
    /// Unrecognized messages handed to the external router
    pub passed_through: u64,

    /// Host-side (interface, group) records
    pub host_groups: u64,
    /// Router-side (interface, group) records
    pub router_groups: u64,
}

impl IgmpStats {
    /// Count a message handed to the network
    pub fn record_sent(&mut self, message: &IgmpMessage) {
        match message {
            IgmpMessage::Query { group, .. } => {
                self.queries_sent += 1;
                if group.is_some() {
                    self.group_specific_queries_sent += 1;
                } else {
                    self.general_queries_sent += 1;
                }
            }
            IgmpMessage::Report { .. } => self.reports_sent += 1,
            IgmpMessage::Leave { .. } => self.leaves_sent += 1,
            IgmpMessage::Unrecognized { .. } => {}
        }
    }

    /// Count a decoded inbound message
    ///
    /// Unrecognized messages are counted by the dispatcher only once an
    /// external router has taken them.
    pub fn record_received(&mut self, message: &IgmpMessage) {
        match message {
            IgmpMessage::Query { group, .. } => {
                self.queries_received += 1;
                if group.is_some() {
                    self.group_specific_queries_received += 1;
                } else {
                    self.general_queries_received += 1;
                }
            }
            IgmpMessage::Report { .. } => self.reports_received += 1,
            IgmpMessage::Leave { .. } => self.leaves_received += 1,
            IgmpMessage::Unrecognized { .. } => {}
        }
    }

    /// Total (interface, group) records on both sides
    pub fn groups(&self) -> u64 {
        self.host_groups + self.router_groups
    }

    /// Export the snapshot as gauges labelled with `node`
    pub fn publish(&self, node: &str) {
        let node = node.to_string();
        let values = [
            ("igmp_queries_sent", self.queries_sent),
            ("igmp_general_queries_sent", self.general_queries_sent),
            ("igmp_group_queries_sent", self.group_specific_queries_sent),
            ("igmp_reports_sent", self.reports_sent),
            ("igmp_leaves_sent", self.leaves_sent),
            ("igmp_queries_received", self.queries_received),
            ("igmp_general_queries_received", self.general_queries_received),
            ("igmp_group_queries_received", self.group_specific_queries_received),
            ("igmp_reports_received", self.reports_received),
            ("igmp_leaves_received", self.leaves_received),
            ("igmp_malformed_received", self.malformed_received),
            ("igmp_passed_through", self.passed_through),
            ("igmp_host_groups", self.host_groups),
            ("igmp_router_groups", self.router_groups),
        ];
        for (name, value) in values {
            gauge!(name, "node" => node.clone()).set(value as f64);
        }
    }
}

/// Register descriptions for the gauges [`IgmpStats::publish`] sets
pub fn describe_metrics() {
    describe_gauge!("igmp_queries_sent", "Membership Queries sent");
    describe_gauge!("igmp_reports_sent", "V2 Membership Reports sent");
    describe_gauge!("igmp_leaves_sent", "Leave Group messages sent");
    describe_gauge!("igmp_queries_received", "Membership Queries received");
    describe_gauge!("igmp_reports_received", "V2 Membership Reports received");
    describe_gauge!("igmp_leaves_received", "Leave Group messages received");
    describe_gauge!("igmp_malformed_received", "Inbound packets that failed to decode");
    describe_gauge!("igmp_host_groups", "Groups joined by local applications");
    describe_gauge!("igmp_router_groups", "Groups with members present on attached links");
}
