//! Connection registry.
//!
//! The registry is the single source of truth for which users are
//! reachable and on which connections. It never writes to connections;
//! interested parties subscribe to its change notifications.

use crate::connection::{ConnectionHandle, ConnectionRecord};
use crate::identity::{ConnectionId, UserIdentity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of users with at least one connection.
    pub identities: usize,
    /// Number of registered connections.
    pub connections: usize,
}

/// Concurrent map from user identity to live connections.
///
/// Lock order is always `by_connection` then `by_identity`, and no shard
/// guard is held across an await.
pub struct Registry {
    /// Records grouped by owner, in registration order.
    by_identity: DashMap<UserIdentity, Vec<ConnectionRecord>>,
    /// Owner of each registered connection.
    by_connection: DashMap<ConnectionId, UserIdentity>,
    /// Generation counter, bumped after every membership change.
    changes: watch::Sender<u64>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            by_identity: DashMap::new(),
            by_connection: DashMap::new(),
            changes,
        }
    }

    /// Register a connection.
    ///
    /// Returns `false` without touching the existing record if the same
    /// connection is already registered.
    pub fn register(&self, record: ConnectionRecord) -> bool {
        let connection_id = record.id().clone();
        let identity = record.identity.clone();

        match self.by_connection.entry(connection_id.clone()) {
            Entry::Occupied(existing) => {
                warn!(
                    connection = %connection_id,
                    user = %existing.get(),
                    "Connection already registered"
                );
                return false;
            }
            Entry::Vacant(slot) => {
                self.by_identity
                    .entry(identity.clone())
                    .or_default()
                    .push(record);
                slot.insert(identity.clone());
            }
        }

        debug!(connection = %connection_id, user = %identity, "Registered connection");
        self.notify();
        true
    }

    /// Remove the record for this exact connection.
    ///
    /// Other connections of the same user are untouched. Removing a
    /// connection that is not registered is a no-op.
    pub fn deregister(&self, handle: &ConnectionHandle) -> Option<ConnectionRecord> {
        let Some((connection_id, identity)) = self.by_connection.remove(handle.id()) else {
            trace!(connection = %handle.id(), "Deregister of unknown connection");
            return None;
        };

        let mut removed = None;
        if let Entry::Occupied(mut entry) = self.by_identity.entry(identity.clone()) {
            let records = entry.get_mut();
            if let Some(pos) = records.iter().position(|r| r.id() == &connection_id) {
                removed = Some(records.remove(pos));
            }
            if records.is_empty() {
                entry.remove();
            }
        }

        debug!(connection = %connection_id, user = %identity, "Deregistered connection");
        self.notify();
        removed
    }

    /// Live connections of a user. Empty means offline.
    #[must_use]
    pub fn connections_for(&self, identity: &UserIdentity) -> Vec<ConnectionHandle> {
        self.by_identity
            .get(identity)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.handle.is_live())
                    .map(|r| r.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the users with at least one live connection.
    #[must_use]
    pub fn online_identities(&self) -> BTreeSet<UserIdentity> {
        self.by_identity
            .iter()
            .filter(|entry| entry.value().iter().any(|r| r.handle.is_live()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Check if a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, identity: &UserIdentity) -> bool {
        !self.connections_for(identity).is_empty()
    }

    /// Every live connection, across all users.
    #[must_use]
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.by_identity
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.handle.is_live())
                    .map(|r| r.handle.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Get registry statistics.
    ///
    /// Only live connections are counted, matching [`Self::online_identities`].
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            identities: 0,
            connections: 0,
        };
        for entry in self.by_identity.iter() {
            let live = entry.value().iter().filter(|r| r.handle.is_live()).count();
            if live > 0 {
                stats.identities += 1;
                stats.connections += live;
            }
        }
        stats
    }

    /// Subscribe to membership changes.
    ///
    /// The value is a generation counter; only the fact that it moved
    /// matters.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
