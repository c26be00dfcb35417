//! Presence broadcasting.
//!
//! The online-user set is never stored. It is recomputed from the
//! registry and pushed to every live connection after membership
//! changes, coalescing bursts of churn into a single broadcast.

use crate::connection::{ConnectionRecord, DeliveryError};
use crate::registry::Registry;
use parley_protocol::OutboundEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Presence broadcaster configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How long to wait for further changes before broadcasting.
    /// Zero broadcasts after every change.
    pub debounce: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
        }
    }
}

/// Publishes the online-user set to all connections.
pub struct PresenceBroadcaster {
    registry: Arc<Registry>,
    config: PresenceConfig,
}

impl PresenceBroadcaster {
    /// Create a broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: PresenceConfig) -> Self {
        Self { registry, config }
    }

    /// Push the current online set to every live connection.
    ///
    /// Returns the number of connections the update was queued for.
    /// Failures on individual connections are logged and skipped.
    pub fn publish_presence(&self) -> usize {
        let online: Vec<String> = self
            .registry
            .online_identities()
            .into_iter()
            .map(|id| id.into_inner())
            .collect();
        let online_count = online.len();
        let event = Arc::new(OutboundEvent::online_users(online));

        let mut delivered = 0;
        for handle in self.registry.all_connections() {
            match handle.deliver(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection = %handle.id(), reason = e.as_str(), "Presence update not delivered");
                }
            }
        }

        trace!(online = online_count, recipients = delivered, "Published presence");
        delivered
    }

    /// Tell a newly registered connection who it is.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection can no longer accept events.
    pub fn confirm(&self, record: &ConnectionRecord) -> Result<(), DeliveryError> {
        record
            .handle
            .deliver(Arc::new(OutboundEvent::connected(record.identity.as_str())))
    }

    /// Broadcast presence after registry changes until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut changes = self.registry.subscribe();
        info!(debounce_ms = self.config.debounce.as_millis() as u64, "Presence broadcaster started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        warn!("Registry dropped, stopping presence broadcaster");
                        break;
                    }
                }
            }

            if !self.config.debounce.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.debounce) => {}
                }
            }

            // Everything that changed during the debounce window is covered
            // by this one broadcast.
            changes.borrow_and_update();
            self.publish_presence();
        }

        info!("Presence broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::identity::ConnectionId;
    use tokio::sync::mpsc;

    type Outbound = mpsc::Receiver<Arc<OutboundEvent>>;

    fn connect(registry: &Registry, user: &str) -> (ConnectionRecord, Outbound) {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::generate(), 16);
        let record = ConnectionRecord::new(user.into(), handle);
        registry.register(record.clone());
        (record, rx)
    }

    fn drain(rx: &mut Outbound) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn online(users: &[&str]) -> OutboundEvent {
        OutboundEvent::online_users(users.iter().map(|u| u.to_string()).collect())
    }

    #[test]
    fn test_publish_to_all() {
        let registry = Arc::new(Registry::new());
        let presence = PresenceBroadcaster::new(Arc::clone(&registry), PresenceConfig::default());

        let (_c1, mut rx1) = connect(&registry, "u1");
        let (_c2, mut rx2) = connect(&registry, "u2");

        assert_eq!(presence.publish_presence(), 2);
        assert_eq!(drain(&mut rx1), vec![online(&["u1", "u2"])]);
        assert_eq!(drain(&mut rx2), vec![online(&["u1", "u2"])]);
    }

    #[test]
    fn test_publish_skips_dead_connections() {
        let registry = Arc::new(Registry::new());
        let presence = PresenceBroadcaster::new(Arc::clone(&registry), PresenceConfig::default());

        let (_c1, mut rx1) = connect(&registry, "u1");
        let (_c2, rx2) = connect(&registry, "u2");
        drop(rx2);

        assert_eq!(presence.publish_presence(), 1);
        assert_eq!(drain(&mut rx1), vec![online(&["u1"])]);
    }

    #[test]
    fn test_confirm() {
        let registry = Arc::new(Registry::new());
        let presence = PresenceBroadcaster::new(Arc::clone(&registry), PresenceConfig::default());

        let (record, mut rx) = connect(&registry, "u1");
        presence.confirm(&record).unwrap();

        assert_eq!(drain(&mut rx), vec![OutboundEvent::connected("u1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_debounces_churn() {
        let registry = Arc::new(Registry::new());
        let config = PresenceConfig {
            debounce: Duration::from_millis(100),
        };
        let presence = Arc::new(PresenceBroadcaster::new(Arc::clone(&registry), config));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&presence).run(shutdown.clone()));
        tokio::task::yield_now().await;

        let (_c1, mut rx1) = connect(&registry, "u1");
        let (c2, _rx2) = connect(&registry, "u2");
        let (_c3, _rx3) = connect(&registry, "u3");
        registry.deregister(&c2.handle);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Four changes, one broadcast with the settled membership.
        assert_eq!(drain(&mut rx1), vec![online(&["u1", "u3"])]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_converges_after_each_settle() {
        let registry = Arc::new(Registry::new());
        let presence = Arc::new(PresenceBroadcaster::new(
            Arc::clone(&registry),
            PresenceConfig {
                debounce: Duration::ZERO,
            },
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&presence).run(shutdown.clone()));
        tokio::task::yield_now().await;

        let (_c1, mut rx1) = connect(&registry, "u1");
        tokio::time::sleep(Duration::from_millis(1)).await;
        let (_c2, _rx2) = connect(&registry, "u2");
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            drain(&mut rx1),
            vec![online(&["u1"]), online(&["u1", "u2"])]
        );

        shutdown.cancel();
        task.await.unwrap();
    }
}
