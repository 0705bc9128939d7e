use std::sync::{Arc, PoisonError, RwLock};

/// Read-mostly holder of an immutable snapshot.
///
/// Readers clone the current `Arc` under a shared lock and release it
/// immediately; a writer swaps in a fully built replacement under the
/// exclusive lock. A reader therefore sees either the old or the new
/// snapshot, never a mix.
#[derive(Debug)]
pub(crate) struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Returns the snapshot installed by the last successful load.
    pub(crate) fn load(&self) -> Arc<T> {
        // The guarded value is always a complete Arc, so a poisoned lock
        // still holds a consistent snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Installs `next` in one step.
    pub(crate) fn replace(&self, next: T) {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
