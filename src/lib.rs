//! Client for a remote benefit ledger: account listing, transfers under three
//! locking strategies, and read-only balance and version inspection.
//!
//! The ledger owns all state and concurrency control. This crate sends
//! requests and reports answers.

pub mod benefits;
pub mod ledger_http;
pub mod logging;
#[cfg(any(test, feature = "stub"))]
pub mod stub_ledger;
