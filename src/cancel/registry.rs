//! Process-wide registry of cancellation handles keyed by message timestamp

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cancellation key must not be empty")]
    EmptyKey,
}

/// Capability to stop one turn.
///
/// Cloning shares the same underlying signal. Two handles compare equal only
/// when they were cloned from the same original.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: u64,
    token: CancellationToken,
    finished: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by the stream consumer
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the owning turn has returned
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    fn mark_finished(&self) {
        self.finished.cancel();
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CancelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CancelHandle {}

/// Concurrent map from outgoing message timestamp to its turn's handle
#[derive(Debug, Default)]
pub struct CancelRegistry {
    entries: DashMap<String, CancelHandle>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` under `key`, replacing whatever was there
    pub fn save(&self, key: &str, handle: CancelHandle) -> Result<(), RegistryError> {
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.entries.insert(key.to_string(), handle).is_some() {
            debug!(key, "replaced existing cancellation handle");
        }
        Ok(())
    }

    pub fn load(&self, key: &str) -> Option<CancelHandle> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Remove the entry for `key` if any
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove the entry for `key` only if it is still `handle`.
    ///
    /// A turn superseded by a regeneration must not remove the handle of the
    /// turn that replaced it.
    pub fn release(&self, key: &str, handle: &CancelHandle) -> bool {
        self.entries.remove_if(key, |_, current| current == handle).is_some()
    }

    /// Fire the handle registered for `key`, if any. Returns the handle so
    /// callers can wait for the turn to wind down.
    pub fn cancel(&self, key: &str) -> Option<CancelHandle> {
        let handle = self.load(key)?;
        handle.cancel();
        debug!(key, "cancellation requested");
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a fresh handle under `key` for the lifetime of the returned
    /// guard. Dropping the guard releases the entry and marks the handle
    /// finished, which covers early returns and panics alike.
    pub fn register(self: &Arc<Self>, key: &str) -> Result<Registration, RegistryError> {
        let handle = CancelHandle::new();
        self.save(key, handle.clone())?;
        Ok(Registration {
            registry: Arc::clone(self),
            key: key.to_string(),
            handle,
        })
    }
}

/// Scope guard for a registered handle
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancelRegistry>,
    key: String,
    handle: CancelHandle,
}

impl Registration {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, &self.handle);
        self.handle.mark_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_returns_same_handle() {
        let registry = CancelRegistry::new();
        let handle = CancelHandle::new();
        registry.save("1.0", handle.clone()).unwrap();

        assert_eq!(registry.load("1.0"), Some(handle));
    }

    #[test]
    fn test_load_after_delete_is_none() {
        let registry = CancelRegistry::new();
        registry.save("1.0", CancelHandle::new()).unwrap();
        registry.delete("1.0");
        registry.delete("1.0");

        assert!(registry.load("1.0").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_overwrites() {
        let registry = CancelRegistry::new();
        let first = CancelHandle::new();
        let second = CancelHandle::new();
        registry.save("1.0", first.clone()).unwrap();
        registry.save("1.0", second.clone()).unwrap();

        assert_eq!(registry.load("1.0"), Some(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let registry = CancelRegistry::new();
        assert_eq!(registry.save("", CancelHandle::new()), Err(RegistryError::EmptyKey));
    }

    #[test]
    fn test_release_ignores_superseded_handle() {
        let registry = CancelRegistry::new();
        let old = CancelHandle::new();
        let new = CancelHandle::new();
        registry.save("1.0", old.clone()).unwrap();
        registry.save("1.0", new.clone()).unwrap();

        assert!(!registry.release("1.0", &old));
        assert_eq!(registry.load("1.0"), Some(new.clone()));
        assert!(registry.release("1.0", &new));
        assert!(registry.load("1.0").is_none());
    }

    #[test]
    fn test_cancel_missing_key_is_noop() {
        let registry = CancelRegistry::new();
        assert!(registry.cancel("nope").is_none());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = CancelRegistry::new();
        let handle = CancelHandle::new();
        registry.save("1.0", handle.clone()).unwrap();

        registry.cancel("1.0");
        registry.cancel("1.0");
        assert!(handle.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registration_guard_releases_and_finishes() {
        let registry = Arc::new(CancelRegistry::new());
        let registration = registry.register("1.0").unwrap();
        let handle = registration.handle().clone();
        assert_eq!(registry.load("1.0"), Some(handle.clone()));

        drop(registration);

        assert!(registry.load("1.0").is_none());
        assert!(handle.is_finished());
        handle.finished().await;
    }

    #[test]
    fn test_finished_waits_for_guard() {
        let registry = Arc::new(CancelRegistry::new());
        let registration = registry.register("1.0").unwrap();
        let handle = registration.handle().clone();

        // cancelling alone does not finish the turn
        registry.cancel("1.0");
        let mut finished = tokio_test::task::spawn(handle.finished());
        tokio_test::assert_pending!(finished.poll());

        drop(registration);
        assert!(finished.is_woken());
        tokio_test::assert_ready!(finished.poll());
    }
}
