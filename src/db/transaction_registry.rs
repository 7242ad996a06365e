//! Slot for "the current" transaction.
//!
//! Code paths that cannot pass a session explicitly can look it up here. The
//! registry only stores a handle: registering does not begin anything and
//! committing a session does not unregister it, so callers set and clear the
//! slot themselves.

use crate::db::session::{SessionState, StateHandle, TransactionSession};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

/// A session shared between tasks.
///
/// Its state can be read without taking the session lock.
#[derive(Debug, Clone)]
pub struct SharedSession {
    session: Arc<Mutex<TransactionSession>>,
    state: StateHandle,
}

impl SharedSession {
    pub fn new(session: TransactionSession) -> Self {
        Self {
            state: session.state_handle(),
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Wait for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, TransactionSession> {
        self.session.lock().await
    }

    /// Current state, even while another task holds the session.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.session, &b.session)
    }
}

#[derive(Debug, Default)]
pub struct TransactionRegistry {
    slot: RwLock<Option<SharedSession>>,
}

impl TransactionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` as current, returning the one it replaces.
    pub async fn set(&self, session: SharedSession) -> Option<SharedSession> {
        let mut slot = self.slot.write().await;
        let previous = slot.replace(session);
        debug!(replaced = previous.is_some(), "Transaction registered");
        previous
    }

    /// The registered session, if any.
    pub async fn current(&self) -> Option<SharedSession> {
        self.slot.read().await.clone()
    }

    /// Unregister the current session and return it.
    pub async fn clear(&self) -> Option<SharedSession> {
        let removed = self.slot.write().await.take();
        debug!(removed = removed.is_some(), "Transaction registry cleared");
        removed
    }

    /// True when a session is registered and still active.
    ///
    /// Never waits on the session itself, so it is safe to call while the
    /// session is locked.
    pub async fn has_active_transaction(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.state() == SessionState::Active)
    }
}
