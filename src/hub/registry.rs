//! The connection registry.
//!
//! Two tables behind one `RwLock`: connections by id and connection ids by
//! owner identity. Both are updated in the same write-locked section, and the
//! `Open` transition of a connection happens inside that section too, so a
//! reader never sees a connection in one table but not the other, nor an
//! `Open` connection that is not registered.
//!
//! Membership changes (an identity gaining its first connection or losing its
//! last one) are pushed onto an unbounded channel while the write lock is
//! held, which gives the presence tracker the exact order in which they
//! happened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::hub::connection::{CloseReason, Connection, ConnectionId};
use crate::utils::error::RegistryError;

/// An identity crossing the online/offline boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(String),
    Left(String),
}

#[derive(Debug, Default)]
struct Tables {
    by_id: HashMap<ConnectionId, Arc<Connection>>,
    by_identity: HashMap<String, HashSet<ConnectionId>>,
    sealed: bool,
}

#[derive(Debug)]
pub struct Registry {
    tables: RwLock<Tables>,
    max_connections: usize,
    membership: Option<mpsc::UnboundedSender<MembershipChange>>,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            max_connections,
            membership: None,
        }
    }

    /// Registry that reports membership changes on `membership`.
    pub fn with_membership(
        max_connections: usize,
        membership: mpsc::UnboundedSender<MembershipChange>,
    ) -> Self {
        Self {
            membership: Some(membership),
            ..Self::new(max_connections)
        }
    }

    /// Admits a `Connecting` connection and moves it to `Open`.
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        if tables.sealed {
            return Err(RegistryError::Sealed);
        }
        let id = conn.id();
        if tables.by_id.contains_key(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }
        if tables.by_id.len() >= self.max_connections {
            return Err(RegistryError::CapacityReached {
                limit: self.max_connections,
            });
        }
        if !conn.open() {
            return Err(RegistryError::AlreadyExists(id));
        }

        let identity = conn.identity().to_string();
        tables.by_id.insert(id, conn);
        let owned = tables.by_identity.entry(identity.clone()).or_default();
        owned.insert(id);
        if owned.len() == 1 {
            self.notify(MembershipChange::Joined(identity));
        }
        debug!(connection_id = %id, "registered");
        Ok(())
    }

    /// Removes a connection on explicit request.
    pub fn unregister(&self, id: &ConnectionId) -> Result<Arc<Connection>, RegistryError> {
        self.remove(id, CloseReason::Requested)
    }

    /// Starts closing `conn` for `reason`. Returns `false` if another path
    /// already did.
    pub fn close(&self, conn: &Connection, reason: CloseReason) -> bool {
        self.remove(&conn.id(), reason).is_ok()
    }

    /// The single `Open -> Closing` path: unregisters and records the reason.
    pub(crate) fn remove(
        &self,
        id: &ConnectionId,
        reason: CloseReason,
    ) -> Result<Arc<Connection>, RegistryError> {
        let mut tables = self.tables.write();
        let conn = tables
            .by_id
            .remove(id)
            .ok_or(RegistryError::NotFound(*id))?;

        let identity = conn.identity();
        let now_empty = match tables.by_identity.get_mut(identity) {
            Some(owned) => {
                owned.remove(id);
                owned.is_empty()
            }
            None => false,
        };
        if now_empty {
            tables.by_identity.remove(identity);
            self.notify(MembershipChange::Left(identity.to_string()));
        }
        conn.begin_closing(reason);
        debug!(connection_id = %id, %reason, "unregistered");
        Ok(conn)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.tables.read().by_id.get(id).cloned()
    }

    /// Point-in-time copy of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.tables.read().by_id.values().cloned().collect()
    }

    /// Connections subscribed to `topic`. The subscription filter runs after
    /// the read lock is released.
    pub fn list_by_topic(&self, topic: &str) -> Vec<Arc<Connection>> {
        self.snapshot()
            .into_iter()
            .filter(|conn| conn.is_subscribed(topic))
            .collect()
    }

    pub fn list_by_identity(&self, identity: &str) -> Vec<Arc<Connection>> {
        let tables = self.tables.read();
        tables
            .by_identity
            .get(identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.tables.read().by_identity.contains_key(identity)
    }

    pub fn is_sealed(&self) -> bool {
        self.tables.read().sealed
    }

    /// Stops admissions and returns the connections registered at that moment.
    pub(crate) fn seal(&self) -> Vec<Arc<Connection>> {
        let mut tables = self.tables.write();
        tables.sealed = true;
        tables.by_id.values().cloned().collect()
    }

    fn notify(&self, change: MembershipChange) {
        if let Some(tx) = &self.membership {
            let _ = tx.send(change);
        }
    }
}
