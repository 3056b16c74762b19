//!
//! Keepsake: accounts, achievements and exclusive save access for game runtimes.
//!
//! This library is the coordination core that sits between gameplay code and the
//! platform adapters that actually sign players in, store achievements and write
//! save files. The adapters are injected through async traits; the core only
//! guarantees that their results are applied atomically and observed consistently.
//!
//! ## Core Concepts
//!
//! * **Lifetime tokens (`lifetime::LifetimeToken`)**: One-way valid→disposed latches. Every
//!   stateful object carries one and checks it before doing externally observable work.
//! * **Exclusive locks (`lock::ExclusiveLock`)**: FIFO async mutual exclusion returning a scope guard.
//! * **Account registry (`account::AccountRegistry`)**: The authoritative set of signed-in
//!   accounts and the primary pointer, mutated only through queued `Modifier` transactions.
//! * **Achievement system (`achievement::AchievementSystem`)**: Monotonic per-achievement progress
//!   with a coalescing, rate-limited flush loop towards the platform.
//! * **Saving system (`saving::SavingSystem`)**: At most one open handle per named save, with
//!   writes staged in memory and committed atomically through a `StorageBackend`.
//! * **In-memory adapters (`memory`)**: Reference implementations of every adapter trait.

pub mod account;
pub mod achievement;
pub mod clock;
pub mod config;
pub mod lifetime;
pub mod lock;
pub mod memory;
pub mod saving;

pub use account::{Account, AccountRegistry};
pub use achievement::AchievementSystem;
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use lifetime::LifetimeToken;
pub use lock::ExclusiveLock;
pub use saving::SavingSystem;

/// Result type used throughout the Keepsake library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Keepsake library.
///
/// Module errors are wrapped transparently. The remaining variants are the
/// cross-cutting failure kinds that adapters raise and the core propagates unchanged.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An operation was attempted on an object whose lifetime token is disposed.
    #[error("{object} has been invalidated")]
    Invalidated {
        /// Kind of object that was used after disposal
        object: &'static str,
    },

    /// A human explicitly cancelled a platform prompt.
    #[error("User declined {prompt}")]
    UserDeclined {
        /// The prompt that was declined
        prompt: String,
    },

    /// The platform is temporarily unable to serve the request (offline, busy, full storage).
    #[error("Temporarily unavailable: {reason}")]
    Transient {
        /// Description of the environmental condition
        reason: String,
    },

    /// Any other failure reported by a platform adapter.
    #[error("Platform error: {reason}")]
    Platform {
        /// Description of the platform failure
        reason: String,
    },

    /// Structured errors from the account module
    #[error(transparent)]
    Account(account::AccountError),

    /// Structured errors from the achievement module
    #[error(transparent)]
    Achievement(achievement::AchievementError),

    /// Structured errors from the saving module
    #[error(transparent)]
    Saving(saving::SavingError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
            Error::Invalidated { .. } => "lifetime",
            Error::UserDeclined { .. } | Error::Transient { .. } | Error::Platform { .. } => {
                "platform"
            }
            Error::Account(_) => "account",
            Error::Achievement(_) => "achievement",
            Error::Saving(_) => "saving",
        }
    }

    /// Check if this error is a call-order mistake by the caller.
    ///
    /// These are never retried; the caller has to fix the sequence of calls.
    pub fn is_programmer_error(&self) -> bool {
        match self {
            Error::Account(account_err) => account_err.is_precondition_error(),
            Error::Achievement(achievement_err) => achievement_err.is_precondition_error(),
            Error::Saving(saving_err) => saving_err.is_precondition_error(),
            _ => false,
        }
    }

    /// Check if this error is transient and the caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Check if a human declined a prompt.
    pub fn is_user_declined(&self) -> bool {
        matches!(self, Error::UserDeclined { .. })
    }

    /// Check if the object used has already been disposed.
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Error::Invalidated { .. })
    }

    /// Check if this error indicates corrupted persisted data.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Saving(saving_err) => saving_err.is_corruption(),
            _ => false,
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Achievement(achievement_err) => achievement_err.is_not_found(),
            Error::Saving(saving_err) => saving_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict with an open or existing resource.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Account(account_err) => account_err.is_conflict(),
            Error::Saving(saving_err) => saving_err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
