//! Event routing.
//!
//! The router resolves target users to live connections through the
//! registry and queues events on each of them. Delivery is best effort:
//! an offline target is not an error, and a failure on one connection
//! never affects the others.

use crate::connection::ConnectionHandle;
use crate::message::{ChatEvent, TypingEvent};
use crate::registry::Registry;
use parley_protocol::OutboundEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of routing one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the event was queued for.
    pub delivered: usize,
    /// Connections that rejected the event.
    pub failed: usize,
}

impl DeliveryReport {
    /// Number of connections a write was attempted on.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Routes chat and typing events to live connections.
pub struct EventRouter {
    registry: Arc<Registry>,
}

impl EventRouter {
    /// Create a router over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver a persisted chat message.
    ///
    /// Every connection of the receiver gets the message, and so does
    /// every connection of the sender, so the sender's other sessions stay
    /// in sync. Each connection receives it at most once.
    pub fn deliver_message(&self, message: &ChatEvent) -> DeliveryReport {
        let event = Arc::new(OutboundEvent::NewMessage(message.to_payload()));

        let mut seen = HashSet::new();
        let targets: Vec<ConnectionHandle> = self
            .registry
            .connections_for(&message.receiver)
            .into_iter()
            .chain(self.registry.connections_for(&message.sender))
            .filter(|handle| seen.insert(handle.id().clone()))
            .collect();

        if targets.is_empty() {
            trace!(message = %message.id, "No live connections for message");
        }

        let report = self.fan_out(&targets, &event);
        debug!(
            message = %message.id,
            sender = %message.sender,
            receiver = %message.receiver,
            delivered = report.delivered,
            failed = report.failed,
            "Routed message"
        );
        report
    }

    /// Deliver a typing indicator to the receiver's connections only.
    pub fn deliver_typing(&self, typing: &TypingEvent) -> DeliveryReport {
        if typing.sender == typing.receiver {
            trace!(user = %typing.sender, "Ignoring typing event addressed to self");
            return DeliveryReport::default();
        }

        let event = Arc::new(typing.to_outbound());
        let targets = self.registry.connections_for(&typing.receiver);
        let report = self.fan_out(&targets, &event);

        trace!(
            sender = %typing.sender,
            receiver = %typing.receiver,
            is_typing = typing.is_typing,
            delivered = report.delivered,
            "Routed typing indicator"
        );
        report
    }

    fn fan_out(&self, targets: &[ConnectionHandle], event: &Arc<OutboundEvent>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for handle in targets {
            match handle.deliver(Arc::clone(event)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %handle.id(),
                        event = %event.kind(),
                        reason = e.as_str(),
                        "Delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRecord;
    use crate::identity::ConnectionId;
    use crate::message::MessageBody;
    use chrono::Utc;
    use tokio::sync::mpsc;

    type Outbound = mpsc::Receiver<Arc<OutboundEvent>>;

    fn connect(registry: &Registry, user: &str) -> (ConnectionHandle, Outbound) {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::generate(), 16);
        registry.register(ConnectionRecord::new(user.into(), handle.clone()));
        (handle, rx)
    }

    fn chat(from: &str, to: &str, text: &str) -> ChatEvent {
        let now = Utc::now();
        ChatEvent {
            id: "m1".into(),
            sender: from.into(),
            receiver: to.into(),
            body: MessageBody::text(text),
            created_at: now,
            updated_at: now,
        }
    }

    fn drain(rx: &mut Outbound) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    #[test]
    fn test_message_reaches_receiver_and_sender() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));

        let (_a, mut rx_a) = connect(&registry, "a");
        let (_b, mut rx_b) = connect(&registry, "b");
        let (_c, mut rx_c) = connect(&registry, "c");

        let message = chat("a", "b", "hi");
        let report = router.deliver_message(&message);

        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
        let expected = OutboundEvent::NewMessage(message.to_payload());
        assert_eq!(drain(&mut rx_b), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_a), vec![expected]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_message_syncs_all_devices() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));

        let (_a1, mut rx_a1) = connect(&registry, "a");
        let (_a2, mut rx_a2) = connect(&registry, "a");
        let (_b1, mut rx_b1) = connect(&registry, "b");
        let (_b2, mut rx_b2) = connect(&registry, "b");

        let report = router.deliver_message(&chat("a", "b", "hi"));

        assert_eq!(report.delivered, 4);
        for rx in [&mut rx_a1, &mut rx_a2, &mut rx_b1, &mut rx_b2] {
            assert_eq!(drain(rx).len(), 1);
        }
    }

    #[test]
    fn test_message_to_offline_receiver() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));

        let report = router.deliver_message(&chat("a", "b", "hi"));
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(report.attempted(), 0);
    }

    #[test]
    fn test_failed_handle_is_isolated() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));

        let (_a, mut rx_a) = connect(&registry, "a");
        let (_b1, mut rx_b1) = connect(&registry, "b");
        let (b2, _rx_b2) = ConnectionHandle::new(ConnectionId::generate(), 1);
        registry.register(ConnectionRecord::new("b".into(), b2.clone()));

        // Fill the second device's queue so the next write fails.
        b2.deliver(Arc::new(OutboundEvent::online_users(vec![])))
            .unwrap();

        let report = router.deliver_message(&chat("a", "b", "hi"));

        assert_eq!(report, DeliveryReport { delivered: 2, failed: 1 });
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b1).len(), 1);
    }

    #[test]
    fn test_typing_reaches_receiver_only() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));

        let (_a1, mut rx_a1) = connect(&registry, "a");
        let (_a2, mut rx_a2) = connect(&registry, "a");
        let (_b, mut rx_b) = connect(&registry, "b");
        let (_c, mut rx_c) = connect(&registry, "c");

        let report = router.deliver_typing(&TypingEvent::new("a".into(), "b".into(), true));
        assert_eq!(report.delivered, 1);
        router.deliver_typing(&TypingEvent::new("a".into(), "b".into(), false));

        assert_eq!(
            drain(&mut rx_b),
            vec![
                OutboundEvent::user_typing("a", true),
                OutboundEvent::user_typing("a", false)
            ]
        );
        assert!(drain(&mut rx_a1).is_empty());
        assert!(drain(&mut rx_a2).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_typing_to_self_dropped() {
        let registry = Arc::new(Registry::new());
        let router = EventRouter::new(Arc::clone(&registry));
        let (_a, mut rx_a) = connect(&registry, "a");

        let report = router.deliver_typing(&TypingEvent::new("a".into(), "a".into(), true));

        assert_eq!(report.attempted(), 0);
        assert!(drain(&mut rx_a).is_empty());
    }
}
