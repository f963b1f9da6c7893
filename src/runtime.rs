// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Real-time driver for a single node.
//!
//! [`NodeRuntime`] runs an [`IgmpNode`] on tokio: it sleeps until the next
//! timer deadline or the next input, whichever comes first, and forwards
//! whatever the node wants to send to an output channel. The node itself
//! stays single-threaded; the runtime is its only caller.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::logging::{Facility, Logger};
use crate::node::{IgmpNode, OutgoingMessage};
use crate::registry::{InterfaceRegistry, StaticRegistry};
use crate::{log_debug, log_info, log_warning};
use crate::{ControlEvent, InterfaceId, Result};

/// Channel depth for inputs and outputs
pub const CHANNEL_CAPACITY: usize = 1024;

/// Something for the node to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeInput {
    /// Raw IGMP bytes received on an interface
    Packet {
        interface: InterfaceId,
        source: Ipv4Addr,
        data: Vec<u8>,
    },
    /// Interface table or socket layer event
    Control(ControlEvent),
}

/// Drives an [`IgmpNode`] from a tokio task
pub struct NodeRuntime<R: InterfaceRegistry = StaticRegistry> {
    node: IgmpNode<R>,
    input_rx: mpsc::Receiver<NodeInput>,
    output_tx: mpsc::Sender<OutgoingMessage>,
    stats_interval: Option<(String, Duration)>,
    logger: Logger,
}

impl<R: InterfaceRegistry> NodeRuntime<R> {
    /// Wrap a node, returning the runtime with its input sender and output
    /// receiver
    pub fn new(
        node: IgmpNode<R>,
        logger: Logger,
    ) -> (Self, mpsc::Sender<NodeInput>, mpsc::Receiver<OutgoingMessage>) {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let runtime = Self {
            node,
            input_rx,
            output_tx,
            stats_interval: None,
            logger,
        };
        (runtime, input_tx, output_rx)
    }

    /// Publish the node's counters to `metrics` every `period`, labelled `name`
    pub fn with_stats_interval(mut self, name: impl Into<String>, period: Duration) -> Self {
        self.stats_interval = Some((name.into(), period.max(Duration::from_millis(1))));
        self
    }

    /// Run until every input sender is dropped, then hand the node back
    ///
    /// Fatal errors end the run; other errors are logged and skipped.
    pub async fn run(mut self) -> Result<IgmpNode<R>> {
        log_info!(self.logger, Facility::Runtime, "Node runtime started");
        self.node.start(now())?;
        self.flush().await;

        let (stats_name, stats_period) = self
            .stats_interval
            .clone()
            .unwrap_or_else(|| (String::new(), Duration::from_secs(3600)));
        let mut stats_tick = interval(stats_period);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let publish_stats = self.stats_interval.is_some();

        loop {
            let deadline = self.node.next_deadline().map(Instant::from_std);

            tokio::select! {
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let fired = self.node.fire_due_timers(now());
                    self.check(fired.map(|_| ()))?;
                }
                input = self.input_rx.recv() => {
                    let Some(input) = input else {
                        break;
                    };
                    let result = match input {
                        NodeInput::Packet { interface, source, data } => {
                            self.node.receive(interface, source, &data, now())
                        }
                        NodeInput::Control(event) => {
                            log_debug!(self.logger, Facility::Runtime, "Control event: {:?}", event);
                            self.node.handle_control_event(event, now())
                        }
                    };
                    self.check(result)?;
                }
                _ = stats_tick.tick(), if publish_stats => {
                    self.node.stats().publish(&stats_name);
                }
            }

            self.flush().await;
        }

        log_info!(self.logger, Facility::Runtime, "Input closed, node runtime stopping");
        Ok(self.node)
    }

    fn check(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log_warning!(self.logger, Facility::Runtime, "{}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn flush(&mut self) {
        for packet in self.node.take_outgoing() {
            if self.output_tx.send(packet).await.is_err() {
                log_warning!(
                    self.logger,
                    Facility::Runtime,
                    "Output channel closed, dropping outgoing message"
                );
            }
        }
    }
}

/// Current time on the tokio clock, which tests may pause and advance
fn now() -> std::time::Instant {
    Instant::now().into_std()
}
