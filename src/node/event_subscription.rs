// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound membership notifications.

use tokio::sync::broadcast;

use crate::MembershipNotification;

/// Broadcast bus for router membership changes
///
/// Injected into the node at construction. Every clone shares the same
/// channel, so the owner keeps one handle to subscribe from while the node
/// publishes through another.
#[derive(Debug, Clone)]
pub struct EventSubscriptionManager {
    event_tx: broadcast::Sender<MembershipNotification>,
}

impl EventSubscriptionManager {
    /// Create a bus buffering up to `buffer_size` events per slow subscriber
    pub fn new(buffer_size: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer_size);
        Self { event_tx }
    }

    /// Get a new receiver for subscribing to events
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipNotification> {
        self.event_tx.subscribe()
    }

    /// Publish an event, returning how many subscribers received it
    ///
    /// Publishing with no subscribers is not an error.
    pub fn send(&self, event: MembershipNotification) -> usize {
        self.event_tx.send(event).unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for EventSubscriptionManager {
    fn default() -> Self {
        Self::new(256)
    }
}
