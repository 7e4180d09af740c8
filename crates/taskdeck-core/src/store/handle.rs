//! Process-wide store handle with idempotent, reentrant initialization.
//!
//! The handle moves through an explicit Uninitialized → Initializing → Ready
//! state machine guarded by one mutex. A second initialization attempt while
//! the first is in flight waits for it rather than opening a second
//! connection; the store itself still assumes a single active writer.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use super::Store;
use crate::error::{CoreError, CoreResult};

enum State {
    Uninitialized,
    Initializing,
    Ready(Arc<Mutex<Store>>),
}

/// Shared owner of the process-wide store.
pub struct StoreHandle {
    state: Mutex<State>,
    changed: Condvar,
}

impl StoreHandle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninitialized),
            changed: Condvar::new(),
        }
    }

    /// Initialize the handle, opening the store with `open` if nobody has.
    ///
    /// Idempotent: if the store is already ready the existing instance is
    /// returned; if another caller is mid-initialization this call blocks
    /// until that attempt resolves. A failed attempt resets the handle so a
    /// later call can retry.
    pub fn init_with<F>(&self, open: F) -> CoreResult<Arc<Mutex<Store>>>
    where
        F: FnOnce() -> CoreResult<Store>,
    {
        let mut state = self.lock_state();
        loop {
            match &*state {
                State::Ready(store) => return Ok(Arc::clone(store)),
                State::Initializing => {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                State::Uninitialized => {
                    *state = State::Initializing;
                    break;
                }
            }
        }
        drop(state);

        // Open outside the lock so waiters block on the condvar, not on a
        // held mutex around disk I/O.
        let opened = open();

        let mut state = self.lock_state();
        match opened {
            Ok(store) => {
                let store = Arc::new(Mutex::new(store));
                *state = State::Ready(Arc::clone(&store));
                self.changed.notify_all();
                Ok(store)
            }
            Err(e) => {
                *state = State::Uninitialized;
                self.changed.notify_all();
                Err(e)
            }
        }
    }

    /// The ready store, or [`CoreError::NotInitialized`].
    pub fn get(&self) -> CoreResult<Arc<Mutex<Store>>> {
        match &*self.lock_state() {
            State::Ready(store) => Ok(Arc::clone(store)),
            _ => Err(CoreError::NotInitialized),
        }
    }

    /// Tear the handle down, returning it to the uninitialized state.
    ///
    /// The store closes once the last outstanding reference drops.
    pub fn close(&self) {
        let mut state = self.lock_state();
        *state = State::Uninitialized;
        self.changed.notify_all();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_before_init_fails() {
        let handle = StoreHandle::new();
        assert!(matches!(handle.get(), Err(CoreError::NotInitialized)));
    }

    #[test]
    fn test_init_is_idempotent() {
        let handle = StoreHandle::new();
        let first = handle.init_with(Store::open_in_memory).unwrap();
        let second = handle
            .init_with(|| panic!("second init must not reopen"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failed_init_resets_for_retry() {
        let handle = StoreHandle::new();
        let err = handle.init_with(|| Err(CoreError::NotInitialized));
        assert!(err.is_err());
        assert!(handle.init_with(Store::open_in_memory).is_ok());
    }

    #[test]
    fn test_concurrent_init_waits_for_first() {
        let handle = Arc::new(StoreHandle::new());
        let mut joins = Vec::new();
        for _ in 0..4 {
            let handle = Arc::clone(&handle);
            joins.push(std::thread::spawn(move || {
                handle.init_with(Store::open_in_memory).map(|s| Arc::as_ptr(&s) as usize)
            }));
        }
        let ptrs: Vec<usize> = joins
            .into_iter()
            .map(|j| j.join().unwrap().unwrap())
            .collect();
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]), "all callers share one store");
    }

    #[test]
    fn test_close_returns_to_uninitialized() {
        let handle = StoreHandle::new();
        handle.init_with(Store::open_in_memory).unwrap();
        handle.close();
        assert!(matches!(handle.get(), Err(CoreError::NotInitialized)));
    }
}
