//! Ordered log of side effects, shared between jobs and observers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Append-only, thread-safe string log.
///
/// Each `add` is atomic, so entries from concurrent lineages never interleave
/// within a line. Entries appended by one thread keep their relative order;
/// ordering across threads is whatever the lock grants.
#[derive(Debug, Default)]
pub struct JobBuffer {
    values: Mutex<Vec<String>>,
}

impl JobBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: impl Into<String>) {
        self.lock().push(value.into());
    }

    /// Snapshot of every entry, in append order.
    pub fn values(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave a half-written entry, so the
    // log stays usable.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
