//! Client-side components for the remote benefit ledger.
//!
//! The ledger is the only source of truth. Nothing here computes balances or
//! versions; every component issues ledger calls and reports what came back.
//!
//! - [`directory`] - account list snapshot and refresh loop
//! - [`orchestrator`] - single-submission transfers under a lock strategy
//! - [`version`] - version lookup and conflict check
//! - [`balance`] - balance lookup with a short query history

pub mod balance;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod types;
pub mod version;

pub use balance::BalanceInspector;
pub use directory::{AccountDirectory, AccountSnapshot, RefreshRequest};
pub use error::{LedgerError, TransferError, ValidationError};
pub use orchestrator::{SubmissionState, TransferOrchestrator};
pub use types::{AccountId, BenefitAccount, LockStrategy, TransferIntent, TransferOutcome};
pub use version::VersionInspector;
