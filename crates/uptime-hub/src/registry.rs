//! Registry of currently connected validators
//!
//! Entries are keyed by connection, not by validator: a socket can go away
//! before (or without ever) completing signup, and removal must still find
//! it. A validator has at most one live entry; admitting it on a new socket
//! evicts the old one.

use crate::websocket::{ConnectionHandle, ConnectionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConnectedValidator {
    pub validator_id: String,
    pub public_key: String,
    pub connection: ConnectionHandle,
}

pub struct ValidatorRegistry {
    entries: RwLock<HashMap<ConnectionId, ConnectedValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a validator on a connection.
    ///
    /// Returns the entries displaced by this admission (a previous signup on
    /// the same socket, or the same validator on another socket).
    pub fn admit(
        &self,
        validator_id: &str,
        public_key: &str,
        connection: ConnectionHandle,
    ) -> Vec<ConnectedValidator> {
        let conn_id = connection.id();
        let mut entries = self.entries.write();

        let stale: Vec<ConnectionId> = entries
            .iter()
            .filter(|(id, v)| **id == conn_id || v.validator_id == validator_id)
            .map(|(id, _)| *id)
            .collect();
        let evicted: Vec<ConnectedValidator> = stale
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect();

        entries.insert(
            conn_id,
            ConnectedValidator {
                validator_id: validator_id.to_string(),
                public_key: public_key.to_string(),
                connection,
            },
        );

        for old in &evicted {
            if old.connection.id() != conn_id {
                info!(
                    "Validator {} reconnected, dropping connection {}",
                    old.validator_id,
                    old.connection.id()
                );
            }
        }
        evicted
    }

    /// Remove whatever is registered on `conn_id`. No-op for unknown sockets.
    pub fn remove(&self, conn_id: &ConnectionId) -> Option<ConnectedValidator> {
        let removed = self.entries.write().remove(conn_id);
        if removed.is_none() {
            debug!("Connection {} was not registered", conn_id);
        }
        removed
    }

    pub fn list_connected(&self) -> Vec<ConnectedValidator> {
        self.entries.read().values().cloned().collect()
    }

    pub fn get_by_validator(&self, validator_id: &str) -> Option<ConnectedValidator> {
        self.entries
            .read()
            .values()
            .find(|v| v.validator_id == validator_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
