//! HTTP client for the remote benefit ledger.
//!
//! One method per ledger call. Each response is decoded into a wire struct and
//! checked before it becomes a domain value: a 2xx body with `success: false`,
//! a missing payload field or an echoed id that doesn't match the request is
//! rejected here. Nothing in this module retries.

use reqwest::RequestBuilder;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use url::Url;

use crate::benefits::error::{LedgerError, LedgerResult};
use crate::benefits::types::{
    local_timestamp, AccountId, BalanceQueryResult, BenefitAccount, ConflictCheckResult,
    FeasibilityResult, ValidTransfer, VersionQueryResult,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api/v1";
const COLLECTION: &str = "beneficios";

// ─────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// API root; the accounts collection lives at `{api_base}/beneficios`.
    pub api_base: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load overrides from environment variables (if set).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("BENEFIT_API_BASE") {
            if !v.trim().is_empty() {
                cfg.api_base = v.trim().to_string();
            }
        }
        cfg
    }
}

// ─────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────

/// Error body shape shared by every ledger route.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferWire {
    success: Option<bool>,
    message: Option<String>,
    lock_type: Option<String>,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeasibilityWire {
    success: Option<bool>,
    #[serde(alias = "feasible")]
    transferencia_possivel: Option<bool>,
    message: Option<String>,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceWire {
    success: Option<bool>,
    #[serde(alias = "accountId")]
    beneficio_id: Option<AccountId>,
    #[serde(alias = "balance", default)]
    saldo: Option<Decimal>,
    message: Option<String>,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionWire {
    success: Option<bool>,
    #[serde(alias = "accountId")]
    beneficio_id: Option<AccountId>,
    #[serde(alias = "version")]
    versao: Option<u64>,
    message: Option<String>,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictWire {
    success: Option<bool>,
    #[serde(alias = "accountId")]
    beneficio_id: Option<AccountId>,
    #[serde(alias = "hasConflict")]
    tem_conflito: Option<bool>,
    message: Option<String>,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    timestamp: Option<String>,
}

/// Timestamps are display strings. The ledger may send ISO text or epoch millis.
fn opaque_timestamp<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(
            n.as_i64()
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| n.to_string()),
        ),
        _ => None,
    })
}

/// A 2xx body that says `success: false` is still a failure.
fn ensure_success(status: u16, success: Option<bool>, message: &Option<String>) -> LedgerResult<()> {
    if success == Some(false) {
        return Err(LedgerError::Server {
            status,
            message: message.clone(),
        });
    }
    Ok(())
}

fn ensure_same_account(requested: AccountId, echoed: Option<AccountId>) -> LedgerResult<()> {
    match echoed {
        Some(id) if id != requested => Err(LedgerError::Decode(format!(
            "asked for account {requested}, ledger answered for {id}"
        ))),
        _ => Ok(()),
    }
}

/// What the ledger confirmed about an accepted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub message: Option<String>,
    /// Lock type the ledger says it used.
    pub lock_type: Option<String>,
    pub timestamp: String,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: reqwest::Client,
    collection: String,
}

impl LedgerClient {
    /// Builds a client with transport defaults (no client-side timeout).
    pub fn new(cfg: &LedgerConfig) -> Result<Self, url::ParseError> {
        let collection = format!("{}/{}", cfg.api_base.trim_end_matches('/'), COLLECTION);
        // Validate once here so every later format! yields a usable URL.
        Url::parse(&collection)?;
        Ok(Self {
            client: reqwest::Client::new(),
            collection,
        })
    }

    pub fn collection_url(&self) -> &str {
        &self.collection
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.collection, path)
    }

    /// Sends the request and decodes the 2xx body. Non-2xx bodies become
    /// [`LedgerError::Server`] with whatever `message` they carried.
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> LedgerResult<(u16, T)> {
        let resp = req
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.trim().is_empty());
            return Err(LedgerError::Server {
                status: status.as_u16(),
                message,
            });
        }

        // An empty 2xx body decodes as JSON null.
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &body
        };
        let value = serde_json::from_slice(body).map_err(|e| LedgerError::Decode(e.to_string()))?;
        Ok((status.as_u16(), value))
    }

    /// GET `{base}`. A null or empty collection is an empty list.
    pub async fn list_accounts(&self) -> LedgerResult<Vec<BenefitAccount>> {
        debug!(url = %self.collection, "listing accounts");
        let (_, accounts) = self
            .send::<Option<Vec<BenefitAccount>>>(self.client.get(&self.collection))
            .await?;
        Ok(accounts.unwrap_or_default())
    }

    /// POST to the strategy's endpoint. Sent exactly once.
    /// An empty or null 2xx body counts as accepted; `success: false` does not.
    pub async fn transfer(&self, transfer: &ValidTransfer, request_id: &str) -> LedgerResult<TransferReceipt> {
        let route = transfer.strategy().route();
        let url = self.url(route.path);
        debug!(%url, request_id, "submitting transfer");

        let req = self
            .client
            .request(route.method, &url)
            .header("X-Request-Id", request_id)
            .query(&[
                ("fromId", transfer.from_id().to_string()),
                ("toId", transfer.to_id().to_string()),
                ("amount", transfer.amount().to_string()),
            ]);
        let (status, wire) = self.send::<Option<TransferWire>>(req).await?;
        // A bare 2xx still means the ledger took the transfer.
        let Some(wire) = wire else {
            return Ok(TransferReceipt {
                message: None,
                lock_type: None,
                timestamp: local_timestamp(),
            });
        };
        ensure_success(status, wire.success, &wire.message)?;

        Ok(TransferReceipt {
            message: wire.message,
            lock_type: wire.lock_type,
            timestamp: wire.timestamp.unwrap_or_else(local_timestamp),
        })
    }

    /// GET `{base}/verificar-transferencia`.
    pub async fn check_transfer(&self, from_id: AccountId, amount: Decimal) -> LedgerResult<FeasibilityResult> {
        let url = self.url("verificar-transferencia");
        debug!(%url, from_id, %amount, "checking feasibility");
        let req = self
            .client
            .get(&url)
            .query(&[("fromId", from_id.to_string()), ("amount", amount.to_string())]);
        let (status, wire) = self.send::<FeasibilityWire>(req).await?;
        ensure_success(status, wire.success, &wire.message)?;

        let feasible = wire
            .transferencia_possivel
            .ok_or_else(|| LedgerError::Decode("missing transferenciaPossivel".into()))?;
        Ok(FeasibilityResult {
            from_id,
            amount,
            feasible,
            message: wire.message,
            timestamp: wire.timestamp.unwrap_or_else(local_timestamp),
        })
    }

    /// GET `{base}/{id}/saldo`.
    pub async fn balance(&self, account_id: AccountId) -> LedgerResult<BalanceQueryResult> {
        let url = self.url(&format!("{account_id}/saldo"));
        debug!(%url, "fetching balance");
        let (status, wire) = self.send::<BalanceWire>(self.client.get(&url)).await?;
        ensure_success(status, wire.success, &wire.message)?;
        ensure_same_account(account_id, wire.beneficio_id)?;

        let balance = wire
            .saldo
            .ok_or_else(|| LedgerError::Decode("missing saldo".into()))?;
        Ok(BalanceQueryResult {
            success: true,
            account_id,
            balance: Some(balance),
            message: wire.message,
            timestamp: wire.timestamp.unwrap_or_else(local_timestamp),
        })
    }

    /// GET `{base}/{id}/versao`.
    pub async fn version(&self, account_id: AccountId) -> LedgerResult<VersionQueryResult> {
        let url = self.url(&format!("{account_id}/versao"));
        debug!(%url, "fetching version");
        let (status, wire) = self.send::<VersionWire>(self.client.get(&url)).await?;
        ensure_success(status, wire.success, &wire.message)?;
        ensure_same_account(account_id, wire.beneficio_id)?;

        let version = wire
            .versao
            .ok_or_else(|| LedgerError::Decode("missing versao".into()))?;
        Ok(VersionQueryResult {
            success: true,
            account_id,
            version: Some(version),
            message: wire.message,
            timestamp: wire.timestamp.unwrap_or_else(local_timestamp),
        })
    }

    /// GET `{base}/verificar-conflito`.
    pub async fn check_conflict(&self, account_id: AccountId, declared_version: u64) -> LedgerResult<ConflictCheckResult> {
        let url = self.url("verificar-conflito");
        debug!(%url, account_id, declared_version, "checking version conflict");
        let req = self.client.get(&url).query(&[
            ("beneficioId", account_id.to_string()),
            ("versao", declared_version.to_string()),
        ]);
        let (status, wire) = self.send::<ConflictWire>(req).await?;
        ensure_success(status, wire.success, &wire.message)?;
        ensure_same_account(account_id, wire.beneficio_id)?;

        let has_conflict = wire
            .tem_conflito
            .ok_or_else(|| LedgerError::Decode("missing temConflito".into()))?;
        Ok(ConflictCheckResult {
            success: true,
            account_id,
            declared_version,
            has_conflict,
            message: wire.message,
            timestamp: wire.timestamp.unwrap_or_else(local_timestamp),
        })
    }
}
