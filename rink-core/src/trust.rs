//! Trust store interface: which peers connect without a prompt, and as what role.
//!
//! The store is an external collaborator; the session manager only reads it,
//! except for the explicit "remember this device" write during approval. Any
//! store failure degrades to "not trusted" and is never fatal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::PeerId;
use crate::protocol::Role;

/// One remembered device. At most one record per peer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPeerRecord {
    pub peer_id: PeerId,
    pub role: Role,
    pub display_name: String,
    pub last_connected_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("trust store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted trust decisions. Implementations own the storage format.
pub trait TrustStore: Send {
    fn is_trusted(&self, peer_id: &PeerId) -> Result<bool, TrustStoreError>;
    fn role_for(&self, peer_id: &PeerId) -> Result<Option<Role>, TrustStoreError>;
    fn add_trusted(&mut self, record: TrustedPeerRecord) -> Result<(), TrustStoreError>;
    fn update_last_connected(
        &mut self,
        peer_id: &PeerId,
        at: DateTime<Utc>,
    ) -> Result<(), TrustStoreError>;
    fn all_trusted(&self) -> Result<Vec<TrustedPeerRecord>, TrustStoreError>;
}

/// In-memory store used by the daemon and tests.
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    records: HashMap<PeerId, TrustedPeerRecord>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn is_trusted(&self, peer_id: &PeerId) -> Result<bool, TrustStoreError> {
        Ok(self.records.contains_key(peer_id))
    }

    fn role_for(&self, peer_id: &PeerId) -> Result<Option<Role>, TrustStoreError> {
        Ok(self.records.get(peer_id).map(|r| r.role))
    }

    fn add_trusted(&mut self, record: TrustedPeerRecord) -> Result<(), TrustStoreError> {
        self.records.insert(record.peer_id.clone(), record);
        Ok(())
    }

    fn update_last_connected(
        &mut self,
        peer_id: &PeerId,
        at: DateTime<Utc>,
    ) -> Result<(), TrustStoreError> {
        if let Some(record) = self.records.get_mut(peer_id) {
            record.last_connected_at = at;
        }
        Ok(())
    }

    fn all_trusted(&self) -> Result<Vec<TrustedPeerRecord>, TrustStoreError> {
        Ok(self.records.values().cloned().collect())
    }
}
