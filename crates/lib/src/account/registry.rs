//! The account registry: the authoritative set of signed-in accounts.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use handle_trait::Handle;
use tracing::{debug, info};

use super::{
    Account, AccountError, AccountId, AccountProvider, AccountState, Modifier,
    notify::{AccountListener, Dispatcher, ListenerSet, Subscription},
};
use crate::{Error, ExclusiveLock, LifetimeToken, Result};

/// A committed change to the registry, delivered to listeners.
#[derive(Clone, Debug)]
pub enum AccountEvent {
    /// An account signed in or out.
    Changed {
        account: Account,
        state: AccountState,
    },
    /// The primary account changed.
    PrimaryChanged {
        previous: Option<Account>,
        current: Option<Account>,
    },
}

/// Immutable, versioned view of the registry.
///
/// A new snapshot replaces the old one on every committed transaction that
/// changes something, so a snapshot obtained by a reader never changes.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    version: u64,
    accounts: Vec<Account>,
    primary: Option<Account>,
}

impl RegistrySnapshot {
    pub(crate) fn new(version: u64, accounts: Vec<Account>, primary: Option<Account>) -> Self {
        Self {
            version,
            accounts,
            primary,
        }
    }

    /// Number of committed transactions that changed the registry.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Signed-in accounts, in sign-in order.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn primary(&self) -> Option<&Account> {
        self.primary.as_ref()
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.accounts.contains(account)
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id() == id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

pub(crate) struct RegistryInner {
    /// Current snapshot. Only replaced while `gate` is held.
    pub(crate) state: RwLock<Arc<RegistrySnapshot>>,
    /// Transaction slot; FIFO so queued transactions apply in call order
    gate: ExclusiveLock,
    listeners: Arc<ListenerSet>,
    pub(crate) dispatcher: Dispatcher,
    provider: Option<Arc<dyn AccountProvider>>,
    lifetime: LifetimeToken,
}

/// Registry of signed-in accounts and the primary account.
///
/// All mutation goes through [`AccountRegistry::begin_transaction`], which
/// hands out one [`Modifier`] at a time. Reads go through
/// [`AccountRegistry::signed_in`] and never wait for a transaction.
///
/// `AccountRegistry` is a cheap-to-clone handle. It must be created inside a
/// tokio runtime because it spawns its notification task.
///
/// ```
/// # use keepsake::{Account, AccountRegistry};
/// # #[tokio::main]
/// # async fn main() -> keepsake::Result<()> {
/// let registry = AccountRegistry::new();
/// let ada = Account::new("steam:1", "Ada");
///
/// let mut tx = registry.begin_transaction().await?;
/// tx.add(&ada)?;
/// tx.make_primary(Some(&ada))?;
/// tx.commit().await;
///
/// assert_eq!(registry.primary(), Some(ada));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Handle)]
pub struct AccountRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl AccountRegistry {
    /// Create an empty registry without an account provider.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty registry that asks `provider` for sign-in decisions.
    pub fn with_provider(provider: Arc<dyn AccountProvider>) -> Self {
        Self::build(Some(provider))
    }

    fn build(provider: Option<Arc<dyn AccountProvider>>) -> Self {
        let listeners = Arc::new(ListenerSet::default());
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(Arc::new(RegistrySnapshot::default())),
                gate: ExclusiveLock::new("account_registry"),
                dispatcher: Dispatcher::start(listeners.clone()),
                listeners,
                provider,
                lifetime: LifetimeToken::new("account registry"),
            }),
        }
    }

    /// Current snapshot of signed-in accounts.
    pub fn signed_in(&self) -> Arc<RegistrySnapshot> {
        self.inner.state.read().unwrap().clone()
    }

    /// Current primary account, if any.
    pub fn primary(&self) -> Option<Account> {
        self.signed_in().primary().cloned()
    }

    /// Whether the account is currently signed in to this registry.
    pub fn contains(&self, account: &Account) -> bool {
        self.signed_in().contains(account)
    }

    /// The registry's lifetime token.
    pub fn lifetime(&self) -> &LifetimeToken {
        &self.inner.lifetime
    }

    /// Subscribe to committed changes.
    ///
    /// Listeners run on the registry's notification task, never on the caller
    /// that committed. Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AccountEvent) -> Result<()> + Send + Sync + 'static,
    {
        let listener: AccountListener = Arc::new(listener);
        let id = self.inner.listeners.add(listener);
        Subscription::new(&self.inner.listeners, id)
    }

    /// Number of active subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Wait until every event from already committed transactions has been delivered.
    pub async fn flush_notifications(&self) {
        self.inner.dispatcher.flush().await;
    }

    /// Open the next transaction.
    ///
    /// Resolves once every earlier transaction has been committed or dropped.
    pub async fn begin_transaction(&self) -> Result<Modifier> {
        self.inner.lifetime.check()?;
        let scope = self.inner.gate.acquire().await;
        // The registry may have been shut down while we were queued
        self.inner.lifetime.check()?;
        let initial = self.signed_in();
        debug!(version = initial.version(), "Account transaction started");
        Ok(Modifier::new(self.handle(), scope, initial))
    }

    /// Ask the provider for the primary account and make it primary.
    ///
    /// The provider runs before the transaction begins, so a slow platform
    /// prompt never blocks other transactions.
    pub async fn establish_primary(&self) -> Result<Account> {
        self.inner.lifetime.check()?;
        let provider = self.provider("establish_primary")?;
        let account = match provider.establish_primary().await {
            Ok(account) => account,
            Err(e) => {
                if e.is_user_declined() {
                    debug!("Primary account prompt declined");
                }
                return Err(e);
            }
        };

        let mut tx = self.begin_transaction().await?;
        if !tx.initial().contains(&account) {
            tx.add(&account)?;
        }
        tx.make_primary(Some(&account))?;
        tx.commit().await;
        info!(account = %account, "Primary account established");
        Ok(account)
    }

    /// Let the player pick an additional account and sign it in.
    pub async fn pick_account(&self) -> Result<Account> {
        self.inner.lifetime.check()?;
        let provider = self.provider("pick_account")?;
        let account = provider.show_picker().await?;

        let mut tx = self.begin_transaction().await?;
        if !tx.initial().contains(&account) {
            tx.add(&account)?;
        }
        tx.commit().await;
        Ok(account)
    }

    /// Sign one account out in its own transaction.
    pub async fn sign_out(&self, account: &Account) -> Result<()> {
        let mut tx = self.begin_transaction().await?;
        tx.remove(account)?;
        tx.commit().await;
        Ok(())
    }

    /// Sign every account out in one transaction.
    pub async fn sign_out_all(&self) -> Result<()> {
        let mut tx = self.begin_transaction().await?;
        for account in tx.initial().accounts().to_vec() {
            tx.remove(&account)?;
        }
        tx.commit().await;
        Ok(())
    }

    /// Sign every account out and invalidate the registry.
    ///
    /// Later calls are no-ops. Transactions queued behind the shutdown fail
    /// with [`Error::Invalidated`].
    pub async fn shutdown(&self) {
        if self.inner.lifetime.is_disposed() {
            return;
        }
        let mut tx = match self.begin_transaction().await {
            Ok(tx) => tx,
            Err(_) => return,
        };
        for account in tx.initial().accounts().to_vec() {
            // Removing accounts that were signed in at transaction start cannot fail
            let _ = tx.remove(&account);
        }
        self.inner.lifetime.dispose();
        tx.commit().await;
        self.flush_notifications().await;
        info!("Account registry shut down");
    }

    fn provider(&self, operation: &'static str) -> Result<Arc<dyn AccountProvider>> {
        self.inner
            .provider
            .clone()
            .ok_or(Error::Account(AccountError::NoProvider { operation }))
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.signed_in();
        f.debug_struct("AccountRegistry")
            .field("version", &snapshot.version())
            .field("accounts", &snapshot.len())
            .field("primary", &snapshot.primary().map(|a| a.id()))
            .field("listeners", &self.listener_count())
            .finish()
    }
}
