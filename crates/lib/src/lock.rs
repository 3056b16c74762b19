//! Scoped exclusive locks.
//!
//! [`ExclusiveLock`] is an async mutual-exclusion primitive that hands out a
//! [`LockScope`] guard. Only one scope exists at a time, across suspension
//! points, and waiters are admitted in FIFO order (the tokio mutex is fair).
//! The scope is owned, so it can be stored inside another object (a transaction
//! modifier, for example) and released whenever that object is finished.

use std::{fmt, future::Future, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// FIFO async mutual exclusion guarding one logical resource.
#[derive(Clone)]
pub struct ExclusiveLock {
    inner: Arc<Mutex<()>>,
    name: &'static str,
}

impl ExclusiveLock {
    /// Create a new unlocked lock. The name is only used for tracing.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            name,
        }
    }

    /// Wait until the lock is free and take it.
    pub async fn acquire(&self) -> LockScope {
        trace!(lock = self.name, "Waiting for exclusive lock");
        let guard = self.inner.clone().lock_owned().await;
        trace!(lock = self.name, "Exclusive lock acquired");
        LockScope {
            _guard: guard,
            name: self.name,
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<LockScope> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| LockScope {
                _guard: guard,
                name: self.name,
            })
    }

    /// Run a future while holding the lock.
    pub async fn run<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let _scope = self.acquire().await;
        operation.await
    }

    /// Whether some scope currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// The lock's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Proof of exclusive access. The lock is released when the scope is dropped.
#[must_use = "the lock is released as soon as the scope is dropped"]
pub struct LockScope {
    _guard: OwnedMutexGuard<()>,
    name: &'static str,
}

impl Drop for LockScope {
    fn drop(&mut self) {
        trace!(lock = self.name, "Exclusive lock released");
    }
}

impl fmt::Debug for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockScope").field("name", &self.name).finish()
    }
}
