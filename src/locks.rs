//! In-memory per-volume operation locks.
//!
//! The registry rejects a second concurrent operation on the same
//! identifier instead of queueing it; the orchestrator retries aborted
//! calls. Entries are removed on release, so the registry only ever holds
//! identifiers with an operation in flight.

use dashmap::DashSet;

use crate::error::CsiError;

/// Set of identifiers with an operation in progress.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    in_flight: DashSet<String>,
}

impl VolumeLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as busy, returning `false` if it already was.
    pub fn try_acquire(&self, id: &str) -> bool {
        self.in_flight.insert(id.to_owned())
    }

    /// Marks `id` as free. Releasing a free identifier is a no-op.
    pub fn release(&self, id: &str) {
        self.in_flight.remove(id);
    }

    /// Whether `id` is currently held.
    #[must_use]
    pub fn is_held(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Number of identifiers currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether no identifier is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Acquires `id` for the lifetime of the returned guard.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Aborted`] when another operation holds `id`.
    pub fn lock(&self, id: &str) -> Result<VolumeLockGuard<'_>, CsiError> {
        if self.try_acquire(id) {
            Ok(VolumeLockGuard {
                locks: self,
                id: id.to_owned(),
            })
        } else {
            Err(CsiError::Aborted(format!(
                "An operation with the given Volume ID {id} already exists"
            )))
        }
    }
}

/// Releases its identifier when dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct VolumeLockGuard<'a> {
    locks: &'a VolumeLocks,
    id: String,
}

impl VolumeLockGuard<'_> {
    /// Identifier held by this guard.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StatusCode;

    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let locks = VolumeLocks::new();
        assert!(locks.try_acquire("v"));
        assert!(!locks.try_acquire("v"));
        locks.release("v");
        assert!(locks.try_acquire("v"));
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let locks = VolumeLocks::new();
        assert!(locks.try_acquire("a"));
        assert!(locks.try_acquire("b"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn release_of_free_id_is_noop() {
        let locks = VolumeLocks::new();
        locks.release("never-held");
        assert!(locks.is_empty());
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = VolumeLocks::new();
        {
            let guard = locks
                .lock("zone/disk")
                .unwrap_or_else(|err| panic!("lock: {err}"));
            assert_eq!(guard.id(), "zone/disk");
            assert!(locks.is_held("zone/disk"));
        }
        assert!(!locks.is_held("zone/disk"));
        assert!(locks.is_empty());
    }

    #[test]
    fn contended_lock_is_aborted() {
        let locks = VolumeLocks::new();
        let _held = locks.lock("v1").unwrap_or_else(|err| panic!("lock: {err}"));
        let err = locks
            .lock("v1")
            .err()
            .unwrap_or_else(|| panic!("second lock should fail"));
        assert_eq!(err.code(), StatusCode::Aborted);
        assert_eq!(
            err.message(),
            "An operation with the given Volume ID v1 already exists"
        );
    }
}
