//! Error types for the account registry

use thiserror::Error;

/// Errors raised by the account registry and its transactions.
///
/// Every variant except [`AccountError::NoProvider`] is a call-order mistake:
/// the transaction was asked to do something its starting state does not allow.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AccountError {
    /// The account was already signed in when the transaction started.
    #[error("Account already signed in: {account}")]
    AlreadySignedIn { account: String },

    /// The account is neither signed in nor added in this transaction.
    #[error("Account not signed in: {account}")]
    NotSignedIn { account: String },

    /// The account was signed out before and cannot be added again.
    #[error("Account has been signed out and retired: {account}")]
    AccountRetired { account: String },

    /// Only signed-in accounts, or accounts added earlier in the transaction, can become primary.
    #[error("Cannot make {account} primary: it is not signed in")]
    PrimaryNotSignedIn { account: String },

    /// The account was removed earlier in the same transaction.
    #[error("Cannot make {account} primary: it was removed in this transaction")]
    PrimaryRemoved { account: String },

    /// The account was made primary earlier in the same transaction.
    #[error("Cannot remove {account}: it was made primary in this transaction")]
    RemovingPendingPrimary { account: String },

    /// The registry was created without an account provider.
    #[error("No account provider configured for {operation}")]
    NoProvider { operation: &'static str },
}

impl AccountError {
    /// Check if this error is an invalid transaction precondition.
    pub fn is_precondition_error(&self) -> bool {
        !matches!(self, AccountError::NoProvider { .. })
    }

    /// Check if this error indicates the account is already present.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AccountError::AlreadySignedIn { .. })
    }
}

impl From<AccountError> for crate::Error {
    fn from(err: AccountError) -> Self {
        crate::Error::Account(err)
    }
}
