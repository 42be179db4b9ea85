//! Error taxonomy for the client layer.
//!
//! - [`ValidationError`] - malformed intent, caught before any network call
//! - [`LedgerError`] - the remote call itself failed (no response, non-2xx, bad body)
//! - [`TransferError`] - what `execute` can return; remote failures are never in here
//!
//! Inspectors and the orchestrator fold [`LedgerError`] into their result
//! types (`success: false` + message) instead of returning it.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Amount must be greater than zero (got {0})")]
    NonPositiveAmount(Decimal),

    #[error("Missing account id: {0}")]
    MissingAccountId(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No response was received.
    #[error("Ledger unreachable: {0}")]
    Transport(String),

    /// Non-2xx response. `message` comes from the structured error body, if any.
    #[error("Ledger returned {status}: {}", message.as_deref().unwrap_or("no detail"))]
    Server { status: u16, message: Option<String> },

    /// 2xx response whose body didn't pass boundary validation.
    #[error("Unexpected ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// The server's own message, when it sent one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            LedgerError::Server { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LedgerError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Invalid transfer: {0}")]
    Validation(#[from] ValidationError),

    /// A submission is already in flight on this orchestrator.
    #[error("A transfer is already being submitted")]
    SubmissionInFlight,
}

pub type LedgerResult<T> = Result<T, LedgerError>;
