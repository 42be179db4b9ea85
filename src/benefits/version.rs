//! Version Inspector: read-only view of an account's optimistic-concurrency
//! version, and a server-side check of a declared version against it.

use tracing::{info, warn};

use super::error::LedgerError;
use super::types::{local_timestamp, AccountId, ConflictCheckResult, VersionQueryResult};
use crate::ledger_http::LedgerClient;

const GENERIC_VERSION_FAILURE: &str = "Version lookup failed";
const GENERIC_CONFLICT_FAILURE: &str = "Conflict check failed";

fn failure_message(e: &LedgerError, fallback: &str) -> String {
    e.server_message().unwrap_or(fallback).to_string()
}

pub struct VersionInspector {
    ledger: LedgerClient,
}

impl VersionInspector {
    pub fn new(ledger: LedgerClient) -> Self {
        Self { ledger }
    }

    pub async fn get_version(&self, account_id: AccountId) -> VersionQueryResult {
        match self.ledger.version(account_id).await {
            Ok(result) => {
                info!(account_id, version = ?result.version, "🔢 Version fetched");
                result
            }
            Err(e) => {
                warn!(account_id, "🔢 Version lookup failed: {e}");
                VersionQueryResult {
                    success: false,
                    account_id,
                    version: None,
                    message: Some(failure_message(&e, GENERIC_VERSION_FAILURE)),
                    timestamp: local_timestamp(),
                }
            }
        }
    }

    /// The comparison is the server's. On failure `has_conflict` is `false`
    /// and only `success` should be trusted.
    pub async fn check_conflict(&self, account_id: AccountId, declared_version: u64) -> ConflictCheckResult {
        match self.ledger.check_conflict(account_id, declared_version).await {
            Ok(result) => {
                info!(
                    account_id,
                    declared_version,
                    has_conflict = result.has_conflict,
                    "🔢 Conflict checked"
                );
                result
            }
            Err(e) => {
                warn!(account_id, declared_version, "🔢 Conflict check failed: {e}");
                ConflictCheckResult {
                    success: false,
                    account_id,
                    declared_version,
                    has_conflict: false,
                    message: Some(failure_message(&e, GENERIC_CONFLICT_FAILURE)),
                    timestamp: local_timestamp(),
                }
            }
        }
    }
}
