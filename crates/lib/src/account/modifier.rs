//! Exclusive account transactions.

use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use super::{Account, AccountError, AccountEvent, AccountRegistry, AccountState, RegistrySnapshot};
use crate::{Result, lock::LockScope};

#[derive(Clone, Debug, PartialEq, Eq)]
enum PrimaryChange {
    Unchanged,
    /// Set explicitly with `make_primary`
    Set(Option<Account>),
    /// Cleared because the primary account was removed
    ClearedByRemove,
}

/// Exclusive handle for mutating an [`AccountRegistry`].
///
/// Operations are validated against the registry as it was when the
/// transaction started and queued; nothing is visible until the modifier is
/// finished. Finishing happens either through [`Modifier::commit`] or by
/// dropping the modifier: both apply the queued changes, publish a new
/// snapshot, notify listeners and release the transaction slot. Only the
/// first of them has any effect.
#[must_use = "queued changes are applied when the modifier is committed or dropped"]
pub struct Modifier {
    registry: AccountRegistry,
    scope: Option<LockScope>,
    initial: Arc<RegistrySnapshot>,
    added: Vec<Account>,
    removed: Vec<Account>,
    /// Accounts added and removed again inside this transaction
    discarded: Vec<Account>,
    primary: PrimaryChange,
}

/// Outcome of applying a modifier, before the slow cleanup runs.
struct Applied {
    snapshot: Arc<RegistrySnapshot>,
    signed_out: Vec<Account>,
}

impl Modifier {
    pub(crate) fn new(
        registry: AccountRegistry,
        scope: LockScope,
        initial: Arc<RegistrySnapshot>,
    ) -> Self {
        Self {
            registry,
            scope: Some(scope),
            initial,
            added: Vec::new(),
            removed: Vec::new(),
            discarded: Vec::new(),
            primary: PrimaryChange::Unchanged,
        }
    }

    /// The registry state captured when the transaction started.
    pub fn initial(&self) -> &RegistrySnapshot {
        &self.initial
    }

    /// The primary account as it will be after commit, given the queued changes.
    pub fn pending_primary(&self) -> Option<&Account> {
        match &self.primary {
            PrimaryChange::Unchanged => self.initial.primary(),
            PrimaryChange::Set(account) => account.as_ref(),
            PrimaryChange::ClearedByRemove => None,
        }
    }

    /// Queue signing `account` in.
    ///
    /// Fails if the account was already signed in at transaction start or has
    /// been retired. Adding the same account twice is a no-op.
    pub fn add(&mut self, account: &Account) -> Result<()> {
        if self.initial.contains(account) {
            return Err(AccountError::AlreadySignedIn {
                account: account.to_string(),
            }
            .into());
        }
        if !account.is_signed_in() {
            return Err(AccountError::AccountRetired {
                account: account.to_string(),
            }
            .into());
        }
        if self.added.contains(account) {
            return Ok(());
        }
        self.discarded.retain(|a| a != account);
        self.added.push(account.clone());
        Ok(())
    }

    /// Queue signing `account` out.
    ///
    /// The account must be signed in at transaction start or added earlier in
    /// this transaction. Removing the current primary clears the primary unless
    /// a later [`Modifier::make_primary`] picks a replacement. Removing an
    /// account that was both added and made primary in this transaction is
    /// rejected. Removing the same account twice is a no-op.
    pub fn remove(&mut self, account: &Account) -> Result<()> {
        if self.removed.contains(account) || self.discarded.contains(account) {
            return Ok(());
        }
        if self.added.contains(account)
            && self.primary == PrimaryChange::Set(Some(account.clone()))
        {
            return Err(AccountError::RemovingPendingPrimary {
                account: account.to_string(),
            }
            .into());
        }

        let was_primary = self.pending_primary() == Some(account);
        if let Some(position) = self.added.iter().position(|a| a == account) {
            self.added.remove(position);
            self.discarded.push(account.clone());
        } else if self.initial.contains(account) {
            self.removed.push(account.clone());
        } else {
            return Err(AccountError::NotSignedIn {
                account: account.to_string(),
            }
            .into());
        }

        if was_primary {
            self.primary = PrimaryChange::ClearedByRemove;
        }
        Ok(())
    }

    /// Queue a primary change. `None` clears the primary.
    ///
    /// A non-null account must be signed in at transaction start (and not
    /// removed since) or added earlier in this transaction.
    pub fn make_primary(&mut self, account: Option<&Account>) -> Result<()> {
        let Some(account) = account else {
            self.primary = PrimaryChange::Set(None);
            return Ok(());
        };
        if self.removed.contains(account) || self.discarded.contains(account) {
            return Err(AccountError::PrimaryRemoved {
                account: account.to_string(),
            }
            .into());
        }
        if !self.initial.contains(account) && !self.added.contains(account) {
            return Err(AccountError::PrimaryNotSignedIn {
                account: account.to_string(),
            }
            .into());
        }
        self.primary = PrimaryChange::Set(Some(account.clone()));
        Ok(())
    }

    /// Whether any change has been queued.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.discarded.is_empty()
            || self.pending_primary() != self.initial.primary()
    }

    /// Apply the queued changes and release the transaction slot, then run
    /// the sign-out cleanup of every removed account.
    ///
    /// Cleanup failures are logged and swallowed: the registry has already
    /// committed and does not roll back. Returns the snapshot now in effect.
    pub async fn commit(mut self) -> Arc<RegistrySnapshot> {
        let Some(applied) = self.apply() else {
            return self.registry.signed_in();
        };
        for account in &applied.signed_out {
            account.clean_up_after_sign_out().await;
        }
        applied.snapshot
    }

    /// Publish the queued changes. Returns `None` if already applied.
    fn apply(&mut self) -> Option<Applied> {
        let scope = self.scope.take()?;
        let inner = &self.registry.inner;
        let previous_primary = self.initial.primary().cloned();
        let primary = self.pending_primary().cloned();

        let changed = !self.added.is_empty()
            || !self.removed.is_empty()
            || primary != previous_primary;
        let snapshot = if changed {
            let mut accounts: Vec<Account> = self
                .initial
                .accounts()
                .iter()
                .filter(|account| !self.removed.contains(account))
                .cloned()
                .collect();
            accounts.extend(self.added.iter().cloned());
            let snapshot = Arc::new(RegistrySnapshot::new(
                self.initial.version() + 1,
                accounts,
                primary.clone(),
            ));
            *inner.state.write().unwrap() = snapshot.clone();
            snapshot
        } else {
            self.initial.clone()
        };

        // Non-blocking half of the teardown, inside the commit
        let mut signed_out = Vec::new();
        for account in self.removed.iter().chain(self.discarded.iter()) {
            if account.try_sign_out() {
                signed_out.push(account.clone());
            }
        }

        for account in &self.removed {
            inner.dispatcher.dispatch(AccountEvent::Changed {
                account: account.clone(),
                state: AccountState::SignedOut,
            });
        }
        for account in &self.added {
            inner.dispatcher.dispatch(AccountEvent::Changed {
                account: account.clone(),
                state: AccountState::SignedIn,
            });
        }
        if primary != previous_primary {
            inner.dispatcher.dispatch(AccountEvent::PrimaryChanged {
                previous: previous_primary,
                current: primary,
            });
        }

        debug!(
            version = snapshot.version(),
            added = self.added.len(),
            removed = self.removed.len(),
            "Account transaction committed"
        );
        drop(scope);
        Some(Applied {
            snapshot,
            signed_out,
        })
    }
}

impl Drop for Modifier {
    fn drop(&mut self) {
        let Some(applied) = self.apply() else {
            return;
        };
        if applied.signed_out.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for account in applied.signed_out {
                        account.clean_up_after_sign_out().await;
                    }
                });
            }
            Err(_) => warn!(
                count = applied.signed_out.len(),
                "No runtime to run sign-out cleanup of dropped account transaction"
            ),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("open", &self.scope.is_some())
            .field("initial_version", &self.initial.version())
            .field("added", &self.added)
            .field("removed", &self.removed)
            .field("primary", &self.pending_primary())
            .finish()
    }
}
