//! Transfer Orchestrator.
//!
//! Turns a [`TransferIntent`] into exactly one ledger submission on the
//! strategy's endpoint and normalizes whatever comes back into a
//! [`TransferOutcome`]. The locking itself happens on the ledger; here each
//! submission is one opaque request/outcome exchange.
//!
//! Per-instance lifecycle: `Idle → Submitting → {Succeeded | Failed} → Idle`.
//! A second `execute` while `Submitting` is refused before any I/O. The state
//! lives in an atomic, so nothing here serializes callers.
//!
//! Nothing is retried. A submission that times out at the transport level is
//! reported as failed and is not re-sent, since the ledger may have applied it.

use std::sync::atomic::{AtomicU8, Ordering};

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::directory::RefreshRequest;
use super::error::{LedgerError, TransferError};
use super::types::{
    local_timestamp, AccountId, FeasibilityResult, TransferFailure, TransferIntent,
    TransferOutcome, ValidTransfer,
};
use crate::ledger_http::LedgerClient;

const GENERIC_TRANSFER_FAILURE: &str = "Transfer failed";
const GENERIC_FEASIBILITY_FAILURE: &str = "Feasibility check failed";

// ─────────────────────────────────────────────────────────
// Submission state
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubmissionState {
    Idle = 0,
    Submitting = 1,
    Succeeded = 2,
    Failed = 3,
}

impl SubmissionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SubmissionState::Submitting,
            2 => SubmissionState::Succeeded,
            3 => SubmissionState::Failed,
            _ => SubmissionState::Idle,
        }
    }
}

/// Holds the `Submitting` state for one submission. If the submission future
/// is dropped before `finish`, the state falls to `Failed`.
struct SubmissionGuard<'a> {
    state: &'a AtomicU8,
    finished: bool,
}

impl<'a> SubmissionGuard<'a> {
    fn begin(state: &'a AtomicU8) -> Result<Self, TransferError> {
        state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != SubmissionState::Submitting as u8).then_some(SubmissionState::Submitting as u8)
            })
            .map_err(|_| TransferError::SubmissionInFlight)?;
        Ok(Self {
            state,
            finished: false,
        })
    }

    fn finish(mut self, success: bool) {
        let next = if success {
            SubmissionState::Succeeded
        } else {
            SubmissionState::Failed
        };
        self.state.store(next as u8, Ordering::Release);
        self.finished = true;
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state
                .store(SubmissionState::Failed as u8, Ordering::Release);
        }
    }
}

// ─────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────

pub struct TransferOrchestrator {
    ledger: LedgerClient,
    state: AtomicU8,
    /// Where to ask for a directory re-fetch after an accepted transfer.
    refresh_tx: Option<mpsc::Sender<RefreshRequest>>,
}

impl TransferOrchestrator {
    pub fn new(ledger: LedgerClient) -> Self {
        Self {
            ledger,
            state: AtomicU8::new(SubmissionState::Idle as u8),
            refresh_tx: None,
        }
    }

    pub fn with_refresh(mut self, refresh_tx: mpsc::Sender<RefreshRequest>) -> Self {
        self.refresh_tx = Some(refresh_tx);
        self
    }

    pub fn state(&self) -> SubmissionState {
        SubmissionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Clears a finished submission back to `Idle`. No-op while submitting.
    pub fn acknowledge(&self) {
        for done in [SubmissionState::Succeeded, SubmissionState::Failed] {
            let _ = self.state.compare_exchange(
                done as u8,
                SubmissionState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Advisory only: the account may change before a later `execute`.
    /// Any failure to get an answer reads as "not feasible".
    pub async fn verify_feasibility(&self, from_id: AccountId, amount: Decimal) -> FeasibilityResult {
        if amount <= Decimal::ZERO {
            return FeasibilityResult {
                from_id,
                amount,
                feasible: false,
                message: Some("Amount must be greater than zero".into()),
                timestamp: local_timestamp(),
            };
        }

        match self.ledger.check_transfer(from_id, amount).await {
            Ok(result) => {
                info!(from_id, %amount, feasible = result.feasible, "🔎 Feasibility checked");
                result
            }
            Err(e) => {
                warn!(from_id, %amount, "🔎 Feasibility check degraded to infeasible: {e}");
                FeasibilityResult {
                    from_id,
                    amount,
                    feasible: false,
                    message: Some(
                        e.server_message()
                            .unwrap_or(GENERIC_FEASIBILITY_FAILURE)
                            .to_string(),
                    ),
                    timestamp: local_timestamp(),
                }
            }
        }
    }

    /// Validates, submits once, and folds the answer into a [`TransferOutcome`].
    ///
    /// Returns `Err` only for local problems (invalid intent, submission
    /// already in flight); those never reach the network. Ledger and
    /// transport failures come back as `Ok` with `success == false`.
    pub async fn execute(&self, intent: &TransferIntent) -> Result<TransferOutcome, TransferError> {
        let transfer = intent.validate()?;
        let guard = SubmissionGuard::begin(&self.state)?;

        let request_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "transfer",
            %request_id,
            from_id = transfer.from_id(),
            to_id = transfer.to_id(),
            amount = %transfer.amount(),
            strategy = %transfer.strategy(),
        );
        let outcome = self.submit(&transfer, &request_id).instrument(span).await;
        guard.finish(outcome.success);

        if outcome.success {
            self.request_refresh(&transfer);
        }
        Ok(outcome)
    }

    async fn submit(&self, transfer: &ValidTransfer, request_id: &str) -> TransferOutcome {
        let strategy = transfer.strategy();
        match self.ledger.transfer(transfer, request_id).await {
            Ok(receipt) => {
                if let Some(echo) = receipt.lock_type.as_deref() {
                    if !echo.eq_ignore_ascii_case(strategy.as_str()) {
                        warn!(echo, "ledger reported a different lock type than requested");
                    }
                }
                info!("✅ Transfer accepted");
                TransferOutcome {
                    from_id: transfer.from_id(),
                    to_id: transfer.to_id(),
                    amount: transfer.amount(),
                    strategy,
                    success: true,
                    message: receipt
                        .message
                        .unwrap_or_else(|| format!("Transfer completed using {strategy} locking")),
                    timestamp: receipt.timestamp,
                    failure: None,
                }
            }
            Err(e) => {
                let failure = match &e {
                    LedgerError::Transport(_) => TransferFailure::Unreachable,
                    LedgerError::Server { status, .. } => TransferFailure::from_status(*status),
                    LedgerError::Decode(_) => TransferFailure::Internal,
                };
                warn!(?failure, "❌ Transfer failed: {e}");
                TransferOutcome {
                    from_id: transfer.from_id(),
                    to_id: transfer.to_id(),
                    amount: transfer.amount(),
                    strategy,
                    success: false,
                    message: e
                        .server_message()
                        .unwrap_or(GENERIC_TRANSFER_FAILURE)
                        .to_string(),
                    timestamp: local_timestamp(),
                    failure: Some(failure),
                }
            }
        }
    }

    fn request_refresh(&self, transfer: &ValidTransfer) {
        let Some(tx) = &self.refresh_tx else {
            return;
        };
        let request = RefreshRequest::TransferCompleted {
            from_id: transfer.from_id(),
            to_id: transfer.to_id(),
        };
        match tx.try_send(request) {
            Ok(()) => {}
            // A refresh is already queued; it will pick this transfer up too.
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("directory refresh channel closed; displayed balances may be stale");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benefits::directory::AccountDirectory;
    use crate::benefits::types::{BenefitAccount, LockStrategy};
    use crate::ledger_http::LedgerConfig;
    use crate::stub_ledger::{self, StubLedger};
    use axum::http::StatusCode;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn client(api_base: String) -> LedgerClient {
        LedgerClient::new(&LedgerConfig { api_base }).unwrap()
    }

    fn account(id: AccountId, balance: Decimal, version: u64) -> BenefitAccount {
        BenefitAccount {
            id,
            name: format!("acc-{id}"),
            description: String::new(),
            balance,
            active: true,
            version: Some(version),
        }
    }

    async fn setup(stub: &StubLedger) -> TransferOrchestrator {
        let (base, _server) = stub_ledger::spawn(stub.clone()).await.unwrap();
        TransferOrchestrator::new(client(base))
    }

    // ── Strategy dispatch ──

    #[tokio::test]
    async fn test_each_strategy_calls_only_its_endpoint() {
        let expected = [
            (LockStrategy::Optimistic, "POST /api/v1/beneficios/transferir"),
            (LockStrategy::Pessimistic, "POST /api/v1/beneficios/transferir/pessimistic"),
            (LockStrategy::Mixed, "POST /api/v1/beneficios/transferir/mixed"),
        ];
        for (strategy, route) in expected {
            let stub = StubLedger::demo();
            let orch = setup(&stub).await;
            let outcome = orch
                .execute(&TransferIntent::new(1, 2, dec!(10), strategy))
                .await
                .unwrap();
            assert!(outcome.success, "{strategy}: {}", outcome.message);
            assert_eq!(outcome.strategy, strategy);
            assert_eq!(stub.hits(), vec![route.to_string()]);
        }
    }

    // ── Local validation ──

    #[tokio::test]
    async fn test_non_positive_amount_never_reaches_network() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        for amount in [dec!(0), dec!(-1)] {
            let err = orch
                .execute(&TransferIntent::new(1, 2, amount, LockStrategy::Optimistic))
                .await
                .unwrap_err();
            assert!(matches!(err, TransferError::Validation(_)));
        }
        assert!(stub.hits().is_empty());
        assert_eq!(orch.state(), SubmissionState::Idle);
    }

    #[tokio::test]
    async fn test_missing_id_never_reaches_network() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        let intent = TransferIntent {
            from_id: None,
            to_id: Some(2),
            amount: dec!(5),
            strategy: LockStrategy::Mixed,
        };
        assert!(matches!(
            orch.execute(&intent).await,
            Err(TransferError::Validation(_))
        ));
        assert!(stub.hits().is_empty());
    }

    // ── Outcome normalization ──

    #[tokio::test]
    async fn test_accepted_transfer_then_relist_shows_server_truth() {
        let stub = StubLedger::new(vec![account(1, dec!(100), 1), account(2, dec!(100), 1)]);
        let (base, _server) = stub_ledger::spawn(stub.clone()).await.unwrap();
        let orch = TransferOrchestrator::new(client(base.clone()));
        let mut dir = AccountDirectory::new(client(base));

        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(40), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.failure, None);
        assert_eq!(orch.state(), SubmissionState::Succeeded);

        dir.list_accounts().await.unwrap();
        assert_eq!(dir.find(1).map(|a| a.balance), Some(dec!(60)));
        assert_eq!(dir.find(2).map(|a| a.balance), Some(dec!(140)));
        assert_eq!(dir.find(1).and_then(|a| a.version), Some(2));
    }

    #[tokio::test]
    async fn test_business_failure_carries_server_message() {
        let stub = StubLedger::new(vec![account(1, dec!(10), 0), account(2, dec!(0), 0)]);
        let orch = setup(&stub).await;
        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(50), LockStrategy::Pessimistic))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("Saldo insuficiente"), "{}", outcome.message);
        assert_eq!(outcome.failure, Some(TransferFailure::BusinessRule));
        assert_eq!(orch.state(), SubmissionState::Failed);
        assert_eq!(stub.account(1).await.map(|a| a.balance), Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_same_account_is_left_to_the_ledger() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        let outcome = orch
            .execute(&TransferIntent::new(1, 1, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(TransferFailure::Rejected));
        assert_eq!(stub.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_status_is_classified() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        stub.fail_next(StatusCode::CONFLICT, Some("Conflito de concorrência: versão mudou"));
        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Mixed))
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(TransferFailure::Conflict));
        assert_eq!(outcome.message, "Conflito de concorrência: versão mudou");
    }

    #[tokio::test]
    async fn test_missing_server_detail_falls_back_to_generic_message() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        stub.fail_next(StatusCode::INTERNAL_SERVER_ERROR, None);
        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, GENERIC_TRANSFER_FAILURE);
        assert_eq!(outcome.failure, Some(TransferFailure::Internal));
    }

    #[tokio::test]
    async fn test_transport_failure_is_folded() {
        let orch = TransferOrchestrator::new(client(stub_ledger::closed_base().await));
        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(TransferFailure::Unreachable));
        assert_eq!(outcome.message, GENERIC_TRANSFER_FAILURE);
    }

    // ── Refresh signalling ──

    #[tokio::test]
    async fn test_success_requests_one_refresh_failure_none() {
        let stub = StubLedger::demo();
        let (base, _server) = stub_ledger::spawn(stub.clone()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let orch = TransferOrchestrator::new(client(base)).with_refresh(tx);

        orch.execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert_eq!(
            rx.try_recv().ok(),
            Some(RefreshRequest::TransferCompleted { from_id: 1, to_id: 2 })
        );

        // Account 4 is inactive: refused, no refresh.
        orch.execute(&TransferIntent::new(1, 4, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bare_2xx_reply_counts_as_accepted() {
        for body in ["", "null"] {
            let stub = StubLedger::demo();
            let (base, _server) = stub_ledger::spawn(stub.clone()).await.unwrap();
            let (tx, mut rx) = mpsc::channel(4);
            let orch = TransferOrchestrator::new(client(base)).with_refresh(tx);
            stub.reply_next(StatusCode::OK, body);

            let outcome = orch
                .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Pessimistic))
                .await
                .unwrap();
            assert!(outcome.success, "body {body:?}: {}", outcome.message);
            assert_eq!(outcome.failure, None);
            assert_eq!(outcome.message, "Transfer completed using pessimistic locking");
            assert!(!outcome.timestamp.is_empty());
            assert_eq!(orch.state(), SubmissionState::Succeeded);
            assert_eq!(
                rx.try_recv().ok(),
                Some(RefreshRequest::TransferCompleted { from_id: 1, to_id: 2 })
            );
        }
    }

    #[tokio::test]
    async fn test_success_false_on_2xx_is_still_a_failure() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        stub.reply_next(
            StatusCode::OK,
            r#"{"success":false,"message":"Erro de negócio: recusado"}"#,
        );
        let outcome = orch
            .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Erro de negócio: recusado");
        assert_eq!(outcome.failure, Some(TransferFailure::Internal));
    }

    // ── Submission state machine ──

    #[tokio::test]
    async fn test_second_submission_refused_while_in_flight() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        orch.state
            .store(SubmissionState::Submitting as u8, Ordering::Release);

        let err = orch
            .execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SubmissionInFlight);
        assert!(stub.hits().is_empty());

        // Acknowledge does not clear an in-flight submission.
        orch.acknowledge();
        assert_eq!(orch.state(), SubmissionState::Submitting);
    }

    #[tokio::test]
    async fn test_acknowledge_returns_to_idle() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        orch.execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert_eq!(orch.state(), SubmissionState::Succeeded);
        orch.acknowledge();
        assert_eq!(orch.state(), SubmissionState::Idle);

        // Finished states accept a new submission directly.
        orch.execute(&TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic))
            .await
            .unwrap();
        assert_eq!(stub.hits().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_submission_leaves_failed() {
        // Accepts connections into the backlog but never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api/v1", silent.local_addr().unwrap());
        let orch = TransferOrchestrator::new(client(base));

        let intent = TransferIntent::new(1, 2, dec!(5), LockStrategy::Optimistic);
        let res = tokio::time::timeout(Duration::from_millis(100), orch.execute(&intent)).await;
        assert!(res.is_err());
        assert_eq!(orch.state(), SubmissionState::Failed);
        drop(silent);
    }

    // ── Feasibility ──

    #[tokio::test]
    async fn test_feasibility_reflects_server_answer() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        assert!(orch.verify_feasibility(1, dec!(500)).await.feasible);
        assert!(!orch.verify_feasibility(1, dec!(500.01)).await.feasible);
        // Inactive source.
        assert!(!orch.verify_feasibility(4, dec!(1)).await.feasible);
        assert_eq!(stub.hits().len(), 3);
    }

    #[tokio::test]
    async fn test_feasibility_degrades_to_infeasible() {
        let orch = TransferOrchestrator::new(client(stub_ledger::closed_base().await));
        let result = orch.verify_feasibility(1, dec!(1)).await;
        assert!(!result.feasible);
        assert_eq!(result.message.as_deref(), Some(GENERIC_FEASIBILITY_FAILURE));

        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        stub.fail_next(StatusCode::BAD_REQUEST, Some("Erro na verificação: x"));
        let result = orch.verify_feasibility(1, dec!(1)).await;
        assert!(!result.feasible);
        assert_eq!(result.message.as_deref(), Some("Erro na verificação: x"));
    }

    #[tokio::test]
    async fn test_feasibility_non_positive_is_local() {
        let stub = StubLedger::demo();
        let orch = setup(&stub).await;
        assert!(!orch.verify_feasibility(1, dec!(0)).await.feasible);
        assert!(stub.hits().is_empty());
    }
}
