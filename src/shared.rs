//! Serialized access to a component shared between driver callbacks and
//! the regulation loop.
//!
//! Sensor and pulse callbacks arrive on driver threads while the
//! controller ticks on its own thread.  Every mutation of a component
//! (history push/evict, counter updates) and every snapshot read goes
//! through [`Shared::lock`], so each one is a single critical section.

use std::sync::{Arc, Mutex, PoisonError};

/// A component behind a mutex, cheaply cloneable as a non-owning handle.
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Run `f` with exclusive access.
    ///
    /// A panic in a previous holder does not wedge the plant: the poisoned
    /// guard is recovered and the component keeps its last state.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> core::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shared")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
