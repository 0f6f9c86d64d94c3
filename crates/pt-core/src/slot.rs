//! Single-occupancy session registry
//!
//! A [`SessionSlot`] holds at most one live session and exposes atomic
//! install, take and conditional clear. Its lock only guards the slot itself
//! and is never held while calling into a session, so a session's own state
//! lock and the slot lock are never nested.

use std::sync::Arc;

use parking_lot::Mutex;

/// Behaviour the slot needs from the sessions it holds
pub trait SlotEntry: Send + Sync {
    /// Identity of the session, unique per manager
    fn id(&self) -> u64;

    /// Whether the session still blocks installation of a new one
    fn is_active(&self) -> bool;
}

/// Result of a rejected install
#[derive(Debug)]
pub struct Occupied<T>(pub Arc<T>);

/// Registry holding at most one session
pub struct SessionSlot<T> {
    inner: Mutex<Option<Arc<T>>>,
}

impl<T: SlotEntry> SessionSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// The installed session, if any
    pub fn current(&self) -> Option<Arc<T>> {
        self.inner.lock().clone()
    }

    /// Install a session built by `make` unless an active one is present.
    ///
    /// On success returns the new session and the inactive session it
    /// displaced, which the caller is responsible for cancelling.
    pub fn install_with<F>(&self, make: F) -> Result<(Arc<T>, Option<Arc<T>>), Occupied<T>>
    where
        F: FnOnce() -> T,
    {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.as_ref() {
            if existing.is_active() {
                return Err(Occupied(Arc::clone(existing)));
            }
        }
        let session = Arc::new(make());
        let previous = guard.replace(Arc::clone(&session));
        Ok((session, previous))
    }

    /// Remove and return the installed session
    pub fn take(&self) -> Option<Arc<T>> {
        self.inner.lock().take()
    }

    /// Clear the slot only if it still holds the session `id`
    pub fn clear_if(&self, id: u64) -> bool {
        let mut guard = self.inner.lock();
        match guard.as_ref() {
            Some(current) if current.id() == id => {
                guard.take();
                true
            }
            _ => false,
        }
    }

    /// Whether the slot still holds the session `id`
    pub fn holds(&self, id: u64) -> bool {
        self.inner
            .lock()
            .as_ref()
            .map(|current| current.id() == id)
            .unwrap_or(false)
    }
}

impl<T: SlotEntry> Default for SessionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
