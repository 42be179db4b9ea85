//! Account Directory.
//!
//! Owns the only piece of shared mutable client state: the current list of
//! accounts. The list is never patched. Every fetch replaces the whole
//! snapshot and publishes it on a `watch` channel, so readers always see one
//! consistent server answer.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::error::LedgerResult;
use super::types::{AccountId, BenefitAccount};
use crate::ledger_http::LedgerClient;

/// Immutable server answer shared by every reader.
pub type AccountSnapshot = Arc<[BenefitAccount]>;

/// Ask the directory actor for a full re-fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A transfer between these accounts was accepted by the ledger.
    TransferCompleted { from_id: AccountId, to_id: AccountId },
    Manual,
}

pub struct AccountDirectory {
    ledger: LedgerClient,
    snapshot_tx: watch::Sender<AccountSnapshot>,
}

impl AccountDirectory {
    pub fn new(ledger: LedgerClient) -> Self {
        let (snapshot_tx, _) = watch::channel(AccountSnapshot::from(Vec::new()));
        Self { ledger, snapshot_tx }
    }

    /// Readers get every replaced snapshot. Only the directory writes.
    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Last snapshot fetched (empty before the first fetch).
    pub fn snapshot(&self) -> AccountSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Always goes to the ledger; never serves the cached list.
    /// On failure the previous snapshot is kept and the error returned.
    pub async fn list_accounts(&mut self) -> LedgerResult<AccountSnapshot> {
        match self.ledger.list_accounts().await {
            Ok(accounts) => {
                let snapshot = self.replace_snapshot(accounts);
                info!(
                    "📒 Directory refreshed: {} accounts ({} active)",
                    snapshot.len(),
                    count_active(&snapshot)
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!("📒 Directory fetch failed, keeping previous snapshot: {e}");
                Err(e)
            }
        }
    }

    fn replace_snapshot(&mut self, accounts: Vec<BenefitAccount>) -> AccountSnapshot {
        let snapshot = AccountSnapshot::from(accounts);
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn active_count(&self) -> usize {
        count_active(&self.snapshot())
    }

    pub fn inactive_count(&self) -> usize {
        let snapshot = self.snapshot();
        snapshot.len() - count_active(&snapshot)
    }

    /// Accounts an operator may pick as transfer endpoints.
    pub fn active_accounts(&self) -> Vec<BenefitAccount> {
        self.snapshot().iter().filter(|a| a.active).cloned().collect()
    }

    pub fn find(&self, id: AccountId) -> Option<BenefitAccount> {
        self.snapshot().iter().find(|a| a.id == id).cloned()
    }

    /// Actor main loop. One full re-fetch per batch of queued requests;
    /// runs until every sender is dropped.
    pub async fn run(mut self, mut refresh_rx: mpsc::Receiver<RefreshRequest>) {
        info!("📒 AccountDirectory refresh loop started");

        while let Some(request) = refresh_rx.recv().await {
            let mut coalesced = 0usize;
            while refresh_rx.try_recv().is_ok() {
                coalesced += 1;
            }
            info!(?request, coalesced, "📒 Refresh requested");
            if let Err(e) = self.list_accounts().await {
                warn!(?request, "📒 Refresh skipped, waiting for the next request: {e}");
            }
        }

        info!("📒 AccountDirectory shutting down (channel closed)");
    }
}

pub fn count_active(accounts: &[BenefitAccount]) -> usize {
    accounts.iter().filter(|a| a.active).count()
}
