//! Read-only resource cache boundary.
//!
//! The watch client maintains a local, eventually-consistent mirror of the
//! watched resources. The dispatch core consumes it read-only as the source
//! of truth for "current known state" when a worker picks up an identity.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::resource::{Resource, ResourceIdentity};

/// Read-only view of the locally mirrored resources.
pub trait ResourceCache<R: Resource>: Send + Sync {
    /// Current known snapshot for an identity, if mirrored.
    fn get(&self, identity: &ResourceIdentity) -> Option<R>;

    /// Identities currently mirrored.
    fn identities(&self) -> Vec<ResourceIdentity>;
}

/// In-memory cache backed by a hash map.
///
/// Doubles as the cache implementation for tests and embedded setups; the
/// watch client owns the write side.
#[derive(Debug, Default)]
pub struct InMemoryResourceCache<R: Resource> {
    entries: RwLock<HashMap<ResourceIdentity, R>>,
}

impl<R: Resource> InMemoryResourceCache<R> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a snapshot.
    pub fn upsert(&self, resource: R) {
        let identity = resource.identity();
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(identity, resource);
        }
    }

    /// Remove a snapshot.
    pub fn remove(&self, identity: &ResourceIdentity) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(identity);
        }
    }

    /// Number of mirrored resources.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Resource> ResourceCache<R> for InMemoryResourceCache<R> {
    fn get(&self, identity: &ResourceIdentity) -> Option<R> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(identity).cloned())
    }

    fn identities(&self) -> Vec<ResourceIdentity> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}
