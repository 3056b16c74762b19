//! One-way validity latches.
//!
//! A [`LifetimeToken`] starts valid and can be disposed exactly once. Every
//! stateful object in the crate owns one and calls [`LifetimeToken::check`]
//! before doing externally observable work, so that use-after-dispose fails
//! with [`Error::Invalidated`] instead of touching a platform adapter.
//!
//! Tokens form trees: [`LifetimeToken::child`] creates a token that is disposed
//! when its parent is. This is how disposing an account reaches its saving
//! system, and how disposing a saving system reaches every open handle.

use std::{
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use handle_trait::Handle;
use tracing::trace;

use crate::{Error, Result};

type InvalidationListener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, InvalidationListener)>,
}

struct TokenInner {
    object: &'static str,
    disposed: AtomicBool,
    listeners: Mutex<ListenerTable>,
    /// Registration on the parent token, released when this token is disposed first
    parent_link: Mutex<Option<InvalidationRegistration>>,
}

/// A one-way valid→disposed latch guarding access to an object.
///
/// Cloning the token shares the latch. Dropping a clone never disposes it.
#[derive(Clone, Handle)]
pub struct LifetimeToken {
    inner: Arc<TokenInner>,
}

impl LifetimeToken {
    /// Create a valid token for an object of the given kind.
    ///
    /// The kind appears in [`Error::Invalidated`] when the token is checked after disposal.
    pub fn new(object: &'static str) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                object,
                disposed: AtomicBool::new(false),
                listeners: Mutex::new(ListenerTable::default()),
                parent_link: Mutex::new(None),
            }),
        }
    }

    /// Create a token that is disposed automatically when `self` is disposed.
    ///
    /// Disposing the child first does not affect the parent, and removes the
    /// child's listener from the parent so long-lived parents do not accumulate
    /// dead registrations.
    pub fn child(&self, object: &'static str) -> LifetimeToken {
        let child = LifetimeToken::new(object);
        let weak_child = Arc::downgrade(&child.inner);
        let registration = self.on_invalidate(move || {
            if let Some(inner) = weak_child.upgrade() {
                LifetimeToken { inner }.dispose();
            }
        });
        *child.inner.parent_link.lock().unwrap() = Some(registration);
        child
    }

    /// The kind of object this token guards.
    pub fn object(&self) -> &'static str {
        self.inner.object
    }

    /// Whether the token has not been disposed yet.
    pub fn is_valid(&self) -> bool {
        !self.inner.disposed.load(Ordering::Acquire)
    }

    /// Whether the token has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.is_valid()
    }

    /// Fail with [`Error::Invalidated`] if the token has been disposed.
    pub fn check(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::Invalidated {
                object: self.inner.object,
            })
        }
    }

    /// Dispose the token.
    ///
    /// Returns `true` for the single call that performed the transition and
    /// `false` for every later call. Invalidation listeners run on the winning
    /// call, outside the listener lock.
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        trace!(object = self.inner.object, "Lifetime token disposed");

        // Unhook from the parent before notifying our own children
        let parent_link = self.inner.parent_link.lock().unwrap().take();
        drop(parent_link);

        let listeners = std::mem::take(&mut self.inner.listeners.lock().unwrap().entries);
        for (_, listener) in listeners {
            listener();
        }
        true
    }

    /// Register a callback to run when the token is disposed.
    ///
    /// If the token is already disposed the callback runs immediately. The
    /// returned registration unregisters the callback when dropped; call
    /// [`InvalidationRegistration::detach`] to keep it for the token's lifetime.
    pub fn on_invalidate<F>(&self, listener: F) -> InvalidationRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut table = self.inner.listeners.lock().unwrap();
        if self.is_disposed() {
            drop(table);
            listener();
            return InvalidationRegistration {
                token: Weak::new(),
                id: None,
            };
        }
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Box::new(listener)));
        InvalidationRegistration {
            token: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Number of invalidation listeners still registered.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().entries.len()
    }
}

impl fmt::Debug for LifetimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeToken")
            .field("object", &self.inner.object)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Registration of an invalidation listener.
///
/// Dropping it removes the listener. The token is referenced weakly so a
/// registration never keeps its token alive.
#[must_use = "dropping the registration unregisters the listener"]
pub struct InvalidationRegistration {
    token: Weak<TokenInner>,
    id: Option<u64>,
}

impl InvalidationRegistration {
    /// Keep the listener registered until the token is disposed.
    pub fn detach(mut self) {
        self.id = None;
    }
}

impl Drop for InvalidationRegistration {
    fn drop(&mut self) {
        let (Some(id), Some(inner)) = (self.id, self.token.upgrade()) else {
            return;
        };
        inner
            .listeners
            .lock()
            .unwrap()
            .entries
            .retain(|(entry_id, _)| *entry_id != id);
    }
}

impl fmt::Debug for InvalidationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRegistration")
            .field("id", &self.id)
            .finish()
    }
}
