//! Sharing one session between threads
//!
//! Guest linear memory must never be touched by two threads at once. A
//! [`SharedSession`] serializes every access behind a mutex; hosts that want
//! parallel rendering should instead give each worker its own instance via
//! [`CompiledGuest::instantiate`](crate::guest::CompiledGuest::instantiate).

use parking_lot::Mutex;
use std::sync::Arc;

use crate::session::SceneSession;

/// Cloneable, mutex-serialized handle to a [`SceneSession`].
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<SceneSession>>,
}

impl SharedSession {
    pub fn new(session: SceneSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` with exclusive access to the session.
    ///
    /// Calls from other threads block until `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&mut SceneSession) -> R) -> R {
        let mut session = self.inner.lock();
        f(&mut session)
    }

    /// Like [`with`](Self::with), but gives up instead of blocking.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut SceneSession) -> R) -> Option<R> {
        let mut session = self.inner.try_lock()?;
        Some(f(&mut session))
    }

    /// Take the session back once no other clone is left.
    pub fn into_inner(self) -> Result<SceneSession, Self> {
        Arc::try_unwrap(self.inner)
            .map(|mutex| mutex.into_inner())
            .map_err(|inner| Self { inner })
    }
}

impl From<SceneSession> for SharedSession {
    fn from(session: SceneSession) -> Self {
        Self::new(session)
    }
}
