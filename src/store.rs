//! Outbound write boundary to the external store.
//!
//! The dispatch core performs three kinds of writes on the controller's
//! behalf: adding a finalizer, removing a finalizer, and patching the
//! status subresource. Each is a fallible network call whose failure routes
//! through the same retry path as callback failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::resource::ResourceIdentity;

/// Write operations against the external store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Record a finalizer on a resource.
    ///
    /// Returns `true` when a write happened, `false` when the finalizer was
    /// already present (idempotent no-op).
    async fn add_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) -> Result<bool>;

    /// Clear a finalizer from a resource.
    ///
    /// Returns `true` when a write happened, `false` when the finalizer was
    /// already absent.
    async fn remove_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) -> Result<bool>;

    /// Write the status subresource.
    async fn write_status(&self, identity: &ResourceIdentity, status: Value) -> Result<()>;
}

/// In-memory store client recording writes.
///
/// Used by tests and embedded setups; counts actual writes (no-ops
/// excluded) and supports failure injection.
#[derive(Debug, Default)]
pub struct InMemoryStoreClient {
    finalizers: Mutex<HashMap<ResourceIdentity, HashSet<String>>>,
    statuses: Mutex<HashMap<ResourceIdentity, Value>>,
    finalizer_add_writes: AtomicU64,
    finalizer_remove_writes: AtomicU64,
    status_writes: AtomicU64,
    fail_finalizer_writes: AtomicBool,
    fail_status_writes: AtomicBool,
}

impl InMemoryStoreClient {
    /// Create an empty store client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-record a finalizer without counting it as a write.
    pub fn seed_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) {
        if let Ok(mut finalizers) = self.finalizers.lock() {
            finalizers
                .entry(identity.clone())
                .or_default()
                .insert(finalizer.to_string());
        }
    }

    /// Whether a finalizer is currently recorded.
    pub fn has_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) -> bool {
        self.finalizers
            .lock()
            .ok()
            .map(|finalizers| {
                finalizers
                    .get(identity)
                    .is_some_and(|set| set.contains(finalizer))
            })
            .unwrap_or(false)
    }

    /// Last status written for an identity.
    pub fn status_of(&self, identity: &ResourceIdentity) -> Option<Value> {
        self.statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(identity).cloned())
    }

    /// Number of finalizer-add writes that actually changed state.
    pub fn finalizer_add_writes(&self) -> u64 {
        self.finalizer_add_writes.load(Ordering::SeqCst)
    }

    /// Number of finalizer-remove writes that actually changed state.
    pub fn finalizer_remove_writes(&self) -> u64 {
        self.finalizer_remove_writes.load(Ordering::SeqCst)
    }

    /// Number of status writes.
    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Make finalizer writes fail until cleared.
    pub fn set_fail_finalizer_writes(&self, fail: bool) {
        self.fail_finalizer_writes.store(fail, Ordering::SeqCst);
    }

    /// Make status writes fail until cleared.
    pub fn set_fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn add_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) -> Result<bool> {
        if self.fail_finalizer_writes.load(Ordering::SeqCst) {
            return Err(Error::store_failed("add_finalizer", "injected failure"));
        }
        let mut finalizers = self
            .finalizers
            .lock()
            .map_err(|_| Error::store_failed("add_finalizer", "state poisoned"))?;
        let written = finalizers
            .entry(identity.clone())
            .or_default()
            .insert(finalizer.to_string());
        if written {
            self.finalizer_add_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(written)
    }

    async fn remove_finalizer(&self, identity: &ResourceIdentity, finalizer: &str) -> Result<bool> {
        if self.fail_finalizer_writes.load(Ordering::SeqCst) {
            return Err(Error::store_failed("remove_finalizer", "injected failure"));
        }
        let mut finalizers = self
            .finalizers
            .lock()
            .map_err(|_| Error::store_failed("remove_finalizer", "state poisoned"))?;
        let written = finalizers
            .get_mut(identity)
            .is_some_and(|set| set.remove(finalizer));
        if written {
            self.finalizer_remove_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(written)
    }

    async fn write_status(&self, identity: &ResourceIdentity, status: Value) -> Result<()> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(Error::store_failed("write_status", "injected failure"));
        }
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| Error::store_failed("write_status", "state poisoned"))?;
        statuses.insert(identity.clone(), status);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
