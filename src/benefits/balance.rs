//! Balance Inspector.
//!
//! Point-in-time balance reads. Successful answers are kept in a short
//! most-recent-first history; failed ones are returned but never recorded.

use std::collections::VecDeque;

use tracing::{info, warn};

use super::types::{local_timestamp, AccountId, BalanceQueryResult};
use crate::ledger_http::LedgerClient;

pub const HISTORY_LIMIT: usize = 5;
const GENERIC_BALANCE_FAILURE: &str = "Balance lookup failed";

pub struct BalanceInspector {
    ledger: LedgerClient,
    history: VecDeque<BalanceQueryResult>,
}

impl BalanceInspector {
    pub fn new(ledger: LedgerClient) -> Self {
        Self {
            ledger,
            history: VecDeque::with_capacity(HISTORY_LIMIT + 1),
        }
    }

    pub async fn get_balance(&mut self, account_id: AccountId) -> BalanceQueryResult {
        match self.ledger.balance(account_id).await {
            Ok(result) => {
                info!(account_id, balance = ?result.balance, "💰 Balance fetched");
                self.history.push_front(result.clone());
                self.history.truncate(HISTORY_LIMIT);
                result
            }
            Err(e) => {
                warn!(account_id, "💰 Balance lookup failed: {e}");
                BalanceQueryResult {
                    success: false,
                    account_id,
                    balance: None,
                    message: Some(e.server_message().unwrap_or(GENERIC_BALANCE_FAILURE).to_string()),
                    timestamp: local_timestamp(),
                }
            }
        }
    }

    /// Most recent first.
    pub fn history(&self) -> impl Iterator<Item = &BalanceQueryResult> {
        self.history.iter()
    }
}
