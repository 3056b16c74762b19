//! Account registry integration tests
//!
//! Transactions, change notifications, provider-driven sign-in and the
//! two-phase sign-out of accounts and the systems bound to them.

mod notifications;
mod provider;
