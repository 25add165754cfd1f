use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
}

struct Active {
    id: u64,
    cancel: watch::Sender<bool>,
}

/// Owns the "is someone talking to us" state
///
/// At most one session is active. Starting hands out a [`Session`] guard;
/// dropping it returns the manager to [`SessionState::Idle`].
#[derive(Default)]
pub struct SessionManager {
    active: Mutex<Option<Active>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> SessionState {
        match *self.active() {
            Some(_) => SessionState::Listening,
            None => SessionState::Idle,
        }
    }

    /// Begin listening; fails with [`Error::SessionActive`] if already listening
    pub fn start(self: &Arc<Self>) -> Result<Session> {
        let mut active = self.active();
        if active.is_some() {
            return Err(Error::SessionActive);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, rx) = watch::channel(false);
        *active = Some(Active { id, cancel });
        tracing::debug!(session = id, "session started");

        Ok(Session {
            id,
            cancellation: Cancellation { rx },
            manager: Arc::clone(self),
        })
    }

    /// Cancel the active session, if any; returns whether one was active
    pub fn stop(&self) -> bool {
        match self.active().as_ref() {
            Some(active) => {
                active.cancel.send_replace(true);
                tracing::debug!(session = active.id, "session cancelled");
                true
            }
            None => false,
        }
    }

    fn finish(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
            tracing::debug!(session = id, "session finished");
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One active listening session
pub struct Session {
    id: u64,
    cancellation: Cancellation,
    manager: Arc<SessionManager>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.finish(self.id);
    }
}

/// Cancellation signal for one session
#[derive(Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the session is cancelled or its manager entry is gone
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
