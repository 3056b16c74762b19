//! Signed-in accounts and the registry that owns them.
//!
//! An [`Account`] is one signed-in platform identity. It is owned by the
//! [`AccountRegistry`] while signed in and retired for good once signed out;
//! signing the same platform identity in again produces a new `Account`.
//!
//! Sign-out is two-phase. [`Account::try_sign_out`] is the non-blocking signal:
//! it flips the state and disposes the account's lifetime token, which in turn
//! invalidates every child token handed to account-scoped systems. The slow part,
//! [`Account::clean_up_after_sign_out`], runs the registered [`SignOutCleanup`]
//! hooks after the registry transaction has released its lock.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use handle_trait::Handle;
use tracing::{debug, warn};

use crate::{Clock, Error, LifetimeToken, Result, SystemClock};

pub mod errors;
mod modifier;
mod notify;
mod registry;

pub use errors::AccountError;
pub use modifier::Modifier;
pub use notify::{AccountListener, Subscription};
pub use registry::{AccountEvent, AccountRegistry, RegistrySnapshot};

static NEXT_ACCOUNT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one `Account` instance.
///
/// Two sign-ins of the same platform identity get different ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(u64);

impl AccountId {
    fn next() -> Self {
        AccountId(NEXT_ACCOUNT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

/// Externally visible account state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountState {
    SignedIn,
    SignedOut,
}

// Teardown phases: Active -> SignalledOut -> CleanedUp
const PHASE_ACTIVE: u8 = 0;
const PHASE_SIGNALLED_OUT: u8 = 1;
const PHASE_CLEANED_UP: u8 = 2;

/// Slow teardown work that must follow an account's sign-out.
///
/// Account-scoped systems (saving, achievements) implement this so that
/// signing the account out disposes them. Hooks run after the registry has
/// committed; failures are logged and swallowed.
#[async_trait]
pub trait SignOutCleanup: Send + Sync {
    /// Release everything tied to the signed-out account.
    async fn clean_up_after_sign_out(&self) -> Result<()>;
}

/// Platform capability that decides which accounts sign in.
///
/// The registry never decides policy itself. It asks the provider (outside of
/// any transaction) and then applies the answer atomically.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Determine the account the game should treat as primary.
    ///
    /// May return an account that is already signed in. Fails with
    /// [`Error::UserDeclined`] or [`Error::Transient`] as the platform dictates.
    async fn establish_primary(&self) -> Result<Account>;

    /// Let the player pick an additional account.
    async fn show_picker(&self) -> Result<Account>;
}

struct AccountInner {
    id: AccountId,
    platform_id: String,
    display_name: String,
    signed_in_at: u64,
    phase: AtomicU8,
    lifetime: LifetimeToken,
    cleanups: Mutex<Vec<Arc<dyn SignOutCleanup>>>,
}

/// A signed-in platform identity.
///
/// `Account` is a cheap-to-clone handle; clones refer to the same identity and
/// compare equal.
#[derive(Clone, Handle)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    /// Create a signed-in account stamped with the system clock.
    pub fn new(platform_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::with_clock(platform_id, display_name, &SystemClock)
    }

    /// Create a signed-in account stamped with the given clock.
    pub fn with_clock(
        platform_id: impl Into<String>,
        display_name: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                id: AccountId::next(),
                platform_id: platform_id.into(),
                display_name: display_name.into(),
                signed_in_at: clock.now_millis(),
                phase: AtomicU8::new(PHASE_ACTIVE),
                lifetime: LifetimeToken::new("account"),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> AccountId {
        self.inner.id
    }

    /// Identifier of this identity on the platform (e.g. a Steam id).
    pub fn platform_id(&self) -> &str {
        &self.inner.platform_id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// Sign-in time in milliseconds since Unix epoch.
    pub fn signed_in_at(&self) -> u64 {
        self.inner.signed_in_at
    }

    pub fn state(&self) -> AccountState {
        match self.inner.phase.load(Ordering::Acquire) {
            PHASE_ACTIVE => AccountState::SignedIn,
            _ => AccountState::SignedOut,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.state() == AccountState::SignedIn
    }

    /// The account's lifetime token. Account-scoped systems derive child tokens from it.
    pub fn lifetime(&self) -> &LifetimeToken {
        &self.inner.lifetime
    }

    /// Register a hook to run after this account signs out.
    ///
    /// Fails with [`Error::Invalidated`] if the account is already signed out.
    pub fn register_cleanup(&self, cleanup: Arc<dyn SignOutCleanup>) -> Result<()> {
        let mut cleanups = self.inner.cleanups.lock().unwrap();
        // Checked under the lock so a concurrent cleanup pass cannot miss the hook
        if self.inner.phase.load(Ordering::Acquire) != PHASE_ACTIVE {
            return Err(Error::Invalidated { object: "account" });
        }
        cleanups.push(cleanup);
        Ok(())
    }

    /// Signal sign-out. Non-blocking.
    ///
    /// Returns `true` only for the call that performed the transition; the
    /// caller that wins is responsible for scheduling
    /// [`Account::clean_up_after_sign_out`].
    pub(crate) fn try_sign_out(&self) -> bool {
        // Hold the cleanup lock so registration and the phase flip are ordered
        let guard = self.inner.cleanups.lock().unwrap();
        let won = self
            .inner
            .phase
            .compare_exchange(
                PHASE_ACTIVE,
                PHASE_SIGNALLED_OUT,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        drop(guard);
        if won {
            debug!(account = %self, "Account signed out");
            self.inner.lifetime.dispose();
        }
        won
    }

    /// Run the registered cleanup hooks, once.
    ///
    /// Safe to call at any time after [`Account::try_sign_out`], concurrently
    /// with newly signed-in accounts. Hook failures are logged and swallowed.
    pub(crate) async fn clean_up_after_sign_out(&self) {
        if self
            .inner
            .phase
            .compare_exchange(
                PHASE_SIGNALLED_OUT,
                PHASE_CLEANED_UP,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        let cleanups = std::mem::take(&mut *self.inner.cleanups.lock().unwrap());
        for cleanup in cleanups {
            if let Err(e) = cleanup.clean_up_after_sign_out().await {
                warn!(account = %self, "Sign-out cleanup failed: {e}");
            }
        }
        debug!(account = %self, "Account cleanup finished");
    }

    /// Whether the slow cleanup phase has run.
    pub fn is_cleaned_up(&self) -> bool {
        self.inner.phase.load(Ordering::Acquire) == PHASE_CLEANED_UP
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.inner.platform_id, self.inner.id)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.inner.id)
            .field("platform_id", &self.inner.platform_id)
            .field("display_name", &self.inner.display_name)
            .field("state", &self.state())
            .finish()
    }
}
