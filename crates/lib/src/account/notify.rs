//! Account change notifications.
//!
//! Committed transactions hand their events to a single dispatcher task, which
//! is the one context every listener is called from. Events arrive in commit
//! order. A listener that fails (or panics) is logged and skipped; the others
//! still see the event and the committing caller never sees the failure.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info_span, warn};

use super::registry::AccountEvent;
use crate::Result;

/// Callback invoked for every committed account event.
pub type AccountListener = Arc<dyn Fn(&AccountEvent) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, AccountListener)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: AccountListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(entry_id, _)| *entry_id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Copy of the current listeners, so delivery never holds the lock.
    fn snapshot(&self) -> Vec<AccountListener> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn deliver(&self, event: &AccountEvent) {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Account listener failed on {event:?}: {e}"),
                Err(_) => error!("Account listener panicked on {event:?}"),
            }
        }
    }
}

/// Registration of an account listener. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    listeners: Weak<ListenerSet>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(listeners: &Arc<ListenerSet>, id: u64) -> Self {
        Self {
            listeners: Arc::downgrade(listeners),
            id,
        }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

enum Notification {
    Event(AccountEvent),
    Flush(oneshot::Sender<()>),
}

/// Sending half of the notification task.
///
/// The task exits once the dispatcher (and with it the registry) is dropped.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Dispatcher {
    /// Spawn the notification task. Must be called within a tokio runtime.
    pub(crate) fn start(listeners: Arc<ListenerSet>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, listeners).instrument(info_span!("account_notifications")));
        Self { tx }
    }

    pub(crate) fn dispatch(&self, event: AccountEvent) {
        if self.tx.send(Notification::Event(event)).is_err() {
            warn!("Account notification task has stopped; event dropped");
        }
    }

    /// Wait until every event dispatched before this call has been delivered.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Notification::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Notification>, listeners: Arc<ListenerSet>) {
    debug!("Starting account notification task");
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::Event(event) => listeners.deliver(&event),
            Notification::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Account notification task shutting down");
}
