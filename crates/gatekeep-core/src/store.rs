//! Enrolled identity snapshot and the backing-store contract.

use crate::types::{AccessAttempt, Identity};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent home of enrolled identities and the access log.
pub trait IdentityBackend: Send + Sync {
    fn list_all(&self) -> Result<Vec<Identity>, StoreError>;
    fn upsert(&self, identity: &Identity) -> Result<(), StoreError>;
    fn log_attempt(&self, attempt: &AccessAttempt) -> Result<(), StoreError>;
}

/// In-memory set of enrolled identities, keyed and iterated by id in lexical order.
///
/// The decision loop holds one snapshot per tick; a refresh builds a new
/// store and swaps it in between ticks.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    identities: BTreeMap<String, Identity>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot from the backing store.
    pub fn load(backend: &dyn IdentityBackend) -> Result<Self, StoreError> {
        let identities = backend.list_all()?;
        let store: Self = identities.into_iter().collect();
        tracing::debug!(count = store.len(), "identity snapshot loaded");
        Ok(store)
    }

    /// Insert or replace an identity by id.
    pub fn upsert(&mut self, identity: Identity) {
        if self.identities.insert(identity.id.clone(), identity).is_some() {
            tracing::debug!("replaced existing identity");
        }
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.identities.get(id)
    }

    /// Identities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<Identity> for IdentityStore {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        let mut store = Self::new();
        for identity in iter {
            store.upsert(identity);
        }
        store
    }
}
