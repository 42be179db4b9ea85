//! In-memory benefit ledger speaking the same HTTP surface as the real one.
//!
//! Used by the test suites and by the `ledger_stub` binary for local demos.
//! It applies the real ledger's rules (parameter checks → 400, business rules
//! → 422, concurrency conflicts → 409) and bumps both accounts' versions on
//! every accepted transfer. Every request is recorded so tests can assert
//! which route was hit.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::benefits::types::{AccountId, BenefitAccount, LockStrategy};

pub const API_ROOT: &str = "/api/v1";
const PREFIX: &str = "/api/v1/beneficios";
const TRANSFER_LIMIT: Decimal = dec!(1000000);
const OPTIMISTIC_ATTEMPTS: u32 = 3;

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StubState {
    book: Mutex<BTreeMap<AccountId, BenefitAccount>>,
    hits: StdMutex<Vec<String>>,
    fault: StdMutex<Option<(StatusCode, String)>>,
}

/// Cheap to clone; clones share the same book.
#[derive(Debug, Clone, Default)]
pub struct StubLedger {
    state: Arc<StubState>,
}

impl StubLedger {
    /// Accounts without a version start at 0.
    pub fn new(accounts: Vec<BenefitAccount>) -> Self {
        let book = accounts
            .into_iter()
            .map(|mut a| {
                a.version.get_or_insert(0);
                (a.id, a)
            })
            .collect();
        Self {
            state: Arc::new(StubState {
                book: Mutex::new(book),
                ..StubState::default()
            }),
        }
    }

    /// The four accounts the real ledger seeds at startup.
    pub fn demo() -> Self {
        let seed = [
            ("Vale Alimentação", "Benefício para alimentação", dec!(500.00), true),
            ("Vale Refeição", "Benefício para refeições", dec!(800.00), true),
            ("Plano de Saúde", "Plano de saúde empresarial", dec!(1200.00), true),
            ("Seguro de Vida", "Seguro de vida em grupo", dec!(150.00), false),
        ];
        Self::new(
            seed.into_iter()
                .zip(1..)
                .map(|((name, description, balance, active), id)| BenefitAccount {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    balance,
                    active,
                    version: Some(0),
                })
                .collect(),
        )
    }

    /// `"METHOD /path"` for every request received, oldest first.
    pub fn hits(&self) -> Vec<String> {
        self.state
            .hits
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// The next request (any route) is answered with `status` and a
    /// structured error body carrying this message.
    pub fn fail_next(&self, status: StatusCode, message: Option<&str>) {
        let mut body = json!({ "success": false, "timestamp": now() });
        if let Some(message) = message {
            body["message"] = Value::String(message.to_string());
        }
        self.reply_next(status, &body.to_string());
    }

    /// The next request (any route) is answered with `status` and this raw body.
    pub fn reply_next(&self, status: StatusCode, body: &str) {
        if let Ok(mut fault) = self.state.fault.lock() {
            *fault = Some((status, body.to_string()));
        }
    }

    pub async fn account(&self, id: AccountId) -> Option<BenefitAccount> {
        self.state.book.lock().await.get(&id).cloned()
    }

    /// Bumps an account's version as if someone else had written it.
    pub async fn touch(&self, id: AccountId) -> Option<u64> {
        let mut book = self.state.book.lock().await;
        let account = book.get_mut(&id)?;
        let next = account.version.unwrap_or(0) + 1;
        account.version = Some(next);
        Some(next)
    }

    fn take_fault(&self) -> Option<(StatusCode, String)> {
        self.state.fault.lock().ok().and_then(|mut f| f.take())
    }

    fn record(&self, hit: String) {
        if let Ok(mut hits) = self.state.hits.lock() {
            hits.push(hit);
        }
    }
}

// ─────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────

pub fn router(stub: StubLedger) -> Router {
    Router::new()
        .route(PREFIX, get(list_accounts))
        .route(&format!("{PREFIX}/transferir"), post(transfer_optimistic))
        .route(&format!("{PREFIX}/transferir/pessimistic"), post(transfer_pessimistic))
        .route(&format!("{PREFIX}/transferir/mixed"), post(transfer_mixed))
        .route(&format!("{PREFIX}/verificar-transferencia"), get(check_transfer))
        .route(&format!("{PREFIX}/verificar-conflito"), get(check_conflict))
        .route(&format!("{PREFIX}/:id/saldo"), get(balance))
        .route(&format!("{PREFIX}/:id/versao"), get(version))
        .layer(middleware::from_fn_with_state(stub.clone(), record_and_inject))
        .with_state(stub)
}

/// Binds `127.0.0.1:0` and serves in the background.
/// Returns the API base to hand to `LedgerConfig`.
pub async fn spawn(stub: StubLedger) -> std::io::Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(stub);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("stub ledger stopped: {e}");
        }
    });
    Ok((format!("http://{addr}{API_ROOT}"), handle))
}

/// Serves until the process is stopped.
pub async fn serve(stub: StubLedger, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("🧪 Stub ledger listening on http://{}{}", listener.local_addr()?, PREFIX);
    axum::serve(listener, router(stub)).await
}

async fn record_and_inject(State(stub): State<StubLedger>, req: Request, next: Next) -> Response {
    stub.record(format!("{} {}", req.method(), req.uri().path()));
    if let Some((status, body)) = stub.take_fault() {
        return (status, [(header::CONTENT_TYPE, "application/json")], body).into_response();
    }
    next.run(req).await
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Decimal as a JSON number, the way the ledger serializes amounts.
fn num(amount: Decimal) -> Value {
    rust_decimal::serde::float::serialize(&amount, serde_json::value::Serializer).unwrap_or(Value::Null)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

async fn list_accounts(State(stub): State<StubLedger>) -> Json<Vec<BenefitAccount>> {
    let book = stub.state.book.lock().await;
    Json(book.values().cloned().collect())
}

async fn balance(State(stub): State<StubLedger>, Path(id): Path<AccountId>) -> Response {
    match stub.account(id).await {
        Some(account) => Json(json!({
            "success": true,
            "beneficioId": id,
            "saldo": num(account.balance),
            "timestamp": now(),
        }))
        .into_response(),
        None => not_found(id),
    }
}

async fn version(State(stub): State<StubLedger>, Path(id): Path<AccountId>) -> Response {
    match stub.account(id).await {
        Some(account) => Json(json!({
            "success": true,
            "beneficioId": id,
            "versao": account.version.unwrap_or(0),
            "timestamp": now(),
        }))
        .into_response(),
        None => not_found(id),
    }
}

fn not_found(id: AccountId) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": format!("Erro: Benefício não encontrado: {id}"),
            "beneficioId": id,
            "timestamp": now(),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictParams {
    beneficio_id: AccountId,
    versao: u64,
}

async fn check_conflict(State(stub): State<StubLedger>, Query(p): Query<ConflictParams>) -> Json<Value> {
    // A missing account counts as a conflict.
    let has_conflict = stub
        .account(p.beneficio_id)
        .await
        .map_or(true, |a| a.version.unwrap_or(0) != p.versao);
    Json(json!({
        "success": true,
        "beneficioId": p.beneficio_id,
        "versaoInformada": p.versao,
        "temConflito": has_conflict,
        "timestamp": now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeasibilityParams {
    from_id: AccountId,
    amount: Decimal,
}

async fn check_transfer(State(stub): State<StubLedger>, Query(p): Query<FeasibilityParams>) -> Json<Value> {
    let possible = stub
        .account(p.from_id)
        .await
        .is_some_and(|a| a.active && a.balance >= p.amount && p.amount > Decimal::ZERO);
    Json(json!({
        "success": true,
        "fromId": p.from_id,
        "amount": num(p.amount),
        "transferenciaPossivel": possible,
        "timestamp": now(),
    }))
}

// ─────────────────────────────────────────────────────────
// Transfers
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferParams {
    from_id: Option<AccountId>,
    to_id: Option<AccountId>,
    amount: Option<Decimal>,
}

/// Why the stub refused a transfer. Maps onto the real ledger's statuses.
#[derive(Debug)]
enum Refusal {
    Validation(String),
    Business(String),
    Conflict(String),
}

impl Refusal {
    fn into_response(self, lock: LockStrategy) -> Response {
        let (status, message) = match self {
            Refusal::Validation(m) => (StatusCode::BAD_REQUEST, format!("Erro de validação: {m}")),
            Refusal::Business(m) => (StatusCode::UNPROCESSABLE_ENTITY, format!("Erro de negócio: {m}")),
            Refusal::Conflict(m) => (StatusCode::CONFLICT, format!("Conflito de concorrência: {m}")),
        };
        (
            status,
            Json(json!({
                "success": false,
                "message": message,
                "lockType": lock.as_str(),
                "timestamp": now(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Copy)]
struct Checked {
    from_id: AccountId,
    to_id: AccountId,
    amount: Decimal,
}

fn check_params(p: &TransferParams) -> Result<Checked, Refusal> {
    let (Some(from_id), Some(to_id), Some(amount)) = (p.from_id, p.to_id, p.amount) else {
        return Err(Refusal::Validation("Parâmetros não podem ser nulos".into()));
    };
    if from_id == to_id {
        return Err(Refusal::Validation(
            "Não é possível transferir para o mesmo benefício".into(),
        ));
    }
    if amount <= Decimal::ZERO {
        return Err(Refusal::Validation("Valor da transferência deve ser positivo".into()));
    }
    if amount > TRANSFER_LIMIT {
        return Err(Refusal::Validation(
            "Valor da transferência excede o limite permitido de 1.000.000".into(),
        ));
    }
    Ok(Checked { from_id, to_id, amount })
}

fn load_pair(
    book: &BTreeMap<AccountId, BenefitAccount>,
    t: Checked,
) -> Result<(BenefitAccount, BenefitAccount), Refusal> {
    let from = book
        .get(&t.from_id)
        .cloned()
        .ok_or_else(|| Refusal::Validation(format!("Benefício de origem não encontrado: {}", t.from_id)))?;
    let to = book
        .get(&t.to_id)
        .cloned()
        .ok_or_else(|| Refusal::Validation(format!("Benefício de destino não encontrado: {}", t.to_id)))?;
    if !from.active {
        return Err(Refusal::Business("Benefício de origem não está ativo".into()));
    }
    if !to.active {
        return Err(Refusal::Business("Benefício de destino não está ativo".into()));
    }
    if from.balance < t.amount {
        return Err(Refusal::Business(format!(
            "Saldo insuficiente. Saldo atual: {:.2}, Valor solicitado: {:.2}",
            from.balance, t.amount
        )));
    }
    Ok((from, to))
}

fn apply(book: &mut BTreeMap<AccountId, BenefitAccount>, t: Checked) {
    for (id, delta) in [(t.from_id, -t.amount), (t.to_id, t.amount)] {
        if let Some(account) = book.get_mut(&id) {
            account.balance += delta;
            account.version = Some(account.version.unwrap_or(0) + 1);
        }
    }
}

async fn optimistic(stub: &StubLedger, t: Checked) -> Result<(), Refusal> {
    for attempt in 1..=OPTIMISTIC_ATTEMPTS {
        let (from, to) = {
            let book = stub.state.book.lock().await;
            load_pair(&book, t)?
        };
        let mut book = stub.state.book.lock().await;
        let unchanged = book.get(&t.from_id).map(|a| a.version) == Some(from.version)
            && book.get(&t.to_id).map(|a| a.version) == Some(to.version);
        if unchanged {
            apply(&mut book, t);
            return Ok(());
        }
        drop(book);
        tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
    }
    Err(Refusal::Conflict(format!(
        "Falha na transferência após {OPTIMISTIC_ATTEMPTS} tentativas devido a conflitos de concorrência. Tente novamente."
    )))
}

async fn pessimistic(stub: &StubLedger, t: Checked) -> Result<(), Refusal> {
    let mut book = stub.state.book.lock().await;
    load_pair(&book, t)?;
    apply(&mut book, t);
    Ok(())
}

async fn mixed(stub: &StubLedger, t: Checked) -> Result<(), Refusal> {
    let seen_to_version = stub.account(t.to_id).await.and_then(|a| a.version);
    let mut book = stub.state.book.lock().await;
    let (_, to) = load_pair(&book, t)?;
    if to.version != seen_to_version {
        return Err(Refusal::Conflict(
            "Conflito de concorrência no benefício de destino. Tente novamente.".into(),
        ));
    }
    apply(&mut book, t);
    Ok(())
}

async fn run_transfer(stub: StubLedger, p: TransferParams, lock: LockStrategy) -> Response {
    let result = match check_params(&p) {
        Ok(t) => {
            let applied = match lock {
                LockStrategy::Optimistic => optimistic(&stub, t).await,
                LockStrategy::Pessimistic => pessimistic(&stub, t).await,
                LockStrategy::Mixed => mixed(&stub, t).await,
            };
            applied.map(|_| t)
        }
        Err(r) => Err(r),
    };

    match result {
        Ok(t) => Json(json!({
            "success": true,
            "message": format!("Transferência realizada com sucesso usando {} locking", lock.as_str()),
            "fromId": t.from_id,
            "toId": t.to_id,
            "amount": num(t.amount),
            "lockType": lock.as_str(),
            "timestamp": now(),
        }))
        .into_response(),
        Err(refusal) => refusal.into_response(lock),
    }
}

async fn transfer_optimistic(State(stub): State<StubLedger>, Query(p): Query<TransferParams>) -> Response {
    run_transfer(stub, p, LockStrategy::Optimistic).await
}

async fn transfer_pessimistic(State(stub): State<StubLedger>, Query(p): Query<TransferParams>) -> Response {
    run_transfer(stub, p, LockStrategy::Pessimistic).await
}

async fn transfer_mixed(State(stub): State<StubLedger>, Query(p): Query<TransferParams>) -> Response {
    run_transfer(stub, p, LockStrategy::Mixed).await
}

/// An API base whose port nothing listens on, for transport-failure tests.
#[cfg(test)]
pub(crate) async fn closed_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}{API_ROOT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: AccountId, balance: Decimal, active: bool) -> BenefitAccount {
        BenefitAccount {
            id,
            name: format!("acc-{id}"),
            description: String::new(),
            balance,
            active,
            version: None,
        }
    }

    fn book_of(accounts: Vec<BenefitAccount>) -> BTreeMap<AccountId, BenefitAccount> {
        accounts.into_iter().map(|a| (a.id, a)).collect()
    }

    #[test]
    fn test_params_rules() {
        let p = |f, t, a| TransferParams { from_id: f, to_id: t, amount: a };
        assert!(matches!(check_params(&p(Some(1), None, Some(dec!(1)))), Err(Refusal::Validation(_))));
        assert!(matches!(check_params(&p(Some(1), Some(1), Some(dec!(1)))), Err(Refusal::Validation(_))));
        assert!(matches!(check_params(&p(Some(1), Some(2), Some(dec!(0)))), Err(Refusal::Validation(_))));
        assert!(matches!(
            check_params(&p(Some(1), Some(2), Some(dec!(1000000.01)))),
            Err(Refusal::Validation(_))
        ));
        assert!(check_params(&p(Some(1), Some(2), Some(dec!(1000000)))).is_ok());
    }

    #[test]
    fn test_business_rules() {
        let t = Checked { from_id: 1, to_id: 2, amount: dec!(50) };
        let poor = book_of(vec![account(1, dec!(49.99), true), account(2, dec!(0), true)]);
        assert!(matches!(load_pair(&poor, t), Err(Refusal::Business(_))));

        let inactive = book_of(vec![account(1, dec!(100), true), account(2, dec!(0), false)]);
        assert!(matches!(load_pair(&inactive, t), Err(Refusal::Business(_))));

        let missing = book_of(vec![account(1, dec!(100), true)]);
        assert!(matches!(load_pair(&missing, t), Err(Refusal::Validation(_))));
    }

    #[test]
    fn test_apply_moves_funds_and_bumps_versions() {
        let mut book = book_of(vec![account(1, dec!(100), true), account(2, dec!(5), true)]);
        apply(&mut book, Checked { from_id: 1, to_id: 2, amount: dec!(40) });
        assert_eq!(book[&1].balance, dec!(60));
        assert_eq!(book[&2].balance, dec!(45));
        assert_eq!(book[&1].version, Some(1));
        assert_eq!(book[&2].version, Some(1));
    }

    #[tokio::test]
    async fn test_demo_seed_and_touch() {
        let stub = StubLedger::demo();
        let seguro = stub.account(4).await.unwrap();
        assert!(!seguro.active);
        assert_eq!(seguro.version, Some(0));
        assert_eq!(stub.touch(4).await, Some(1));
        assert_eq!(stub.touch(99).await, None);
    }

    #[test]
    fn test_num_is_a_json_number() {
        assert!(num(dec!(12.5)).is_number());
    }
}
