//! Shared domain types for the benefit ledger client.
//!
//! Every query/outcome type is a point-in-time snapshot that references one
//! account by id. None of them own the account itself.

use std::fmt;
use std::str::FromStr;

use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

pub type AccountId = i64;

// ─────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────

/// Ledger entity holding a named benefit balance and a version number.
///
/// Serialized with the ledger's own field names; the English names are
/// accepted on input too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitAccount {
    pub id: AccountId,
    #[serde(rename = "nome", alias = "name")]
    pub name: String,
    #[serde(rename = "descricao", alias = "description", default)]
    pub description: String,
    /// Non-negative by convention. Only the ledger enforces it.
    #[serde(
        rename = "valor",
        alias = "balance",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub balance: Decimal,
    #[serde(rename = "ativo", alias = "active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

// ─────────────────────────────────────────────────────────
// Strategy dispatch
// ─────────────────────────────────────────────────────────

/// Concurrency-control strategy the ledger applies to a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// Version-checked write; the ledger retries or rejects on mismatch.
    #[default]
    Optimistic,
    /// Exclusive lock held for the duration of the mutation.
    Pessimistic,
    /// Version check gating a conditional lock.
    Mixed,
}

/// Fixed (verb, path) pair a strategy is submitted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRoute {
    pub method: Method,
    /// Path relative to the accounts collection.
    pub path: &'static str,
}

impl LockStrategy {
    pub const ALL: [LockStrategy; 3] = [
        LockStrategy::Optimistic,
        LockStrategy::Pessimistic,
        LockStrategy::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStrategy::Optimistic => "optimistic",
            LockStrategy::Pessimistic => "pessimistic",
            LockStrategy::Mixed => "mixed",
        }
    }

    /// The single endpoint this strategy maps to. Strategies are never combined.
    pub fn route(&self) -> StrategyRoute {
        let path = match self {
            LockStrategy::Optimistic => "transferir",
            LockStrategy::Pessimistic => "transferir/pessimistic",
            LockStrategy::Mixed => "transferir/mixed",
        };
        StrategyRoute {
            method: Method::POST,
            path,
        }
    }
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(LockStrategy::Optimistic),
            "pessimistic" => Ok(LockStrategy::Pessimistic),
            "mixed" => Ok(LockStrategy::Mixed),
            other => Err(format!("unknown lock strategy: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Transfers
// ─────────────────────────────────────────────────────────

/// What the operator asked for, before validation.
///
/// Ids are optional because an intent may be built from incomplete input.
/// Same-account transfers are not rejected here; the ledger decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub from_id: Option<AccountId>,
    pub to_id: Option<AccountId>,
    pub amount: Decimal,
    pub strategy: LockStrategy,
}

impl TransferIntent {
    pub fn new(from_id: AccountId, to_id: AccountId, amount: Decimal, strategy: LockStrategy) -> Self {
        Self {
            from_id: Some(from_id),
            to_id: Some(to_id),
            amount,
            strategy,
        }
    }

    /// Local checks that must pass before anything touches the network.
    pub fn validate(&self) -> Result<ValidTransfer, ValidationError> {
        let from_id = self.from_id.ok_or(ValidationError::MissingAccountId("fromId"))?;
        let to_id = self.to_id.ok_or(ValidationError::MissingAccountId("toId"))?;
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }
        Ok(ValidTransfer {
            from_id,
            to_id,
            amount: self.amount,
            strategy: self.strategy,
        })
    }
}

/// A transfer that passed local validation. Only built by [`TransferIntent::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidTransfer {
    from_id: AccountId,
    to_id: AccountId,
    amount: Decimal,
    strategy: LockStrategy,
}

impl ValidTransfer {
    pub fn from_id(&self) -> AccountId {
        self.from_id
    }

    pub fn to_id(&self) -> AccountId {
        self.to_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn strategy(&self) -> LockStrategy {
        self.strategy
    }
}

/// Coarse reason a submission failed, derived from how the ledger answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// 400: the ledger refused the parameters (same account, limit, unknown id).
    Rejected,
    /// 409: concurrent modification detected.
    Conflict,
    /// 422: business rule (insufficient balance, inactive account).
    BusinessRule,
    /// Any other status, or a 2xx body that didn't decode.
    Internal,
    /// No response at all.
    Unreachable,
}

impl TransferFailure {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => TransferFailure::Rejected,
            409 => TransferFailure::Conflict,
            422 => TransferFailure::BusinessRule,
            _ => TransferFailure::Internal,
        }
    }
}

/// Normalized result of one submission. Always produced, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub from_id: AccountId,
    pub to_id: AccountId,
    pub amount: Decimal,
    /// The strategy that was dispatched, regardless of what the ledger echoed.
    pub strategy: LockStrategy,
    pub success: bool,
    pub message: String,
    /// Opaque display string.
    pub timestamp: String,
    pub failure: Option<TransferFailure>,
}

/// Advisory answer to "could this transfer go through right now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeasibilityResult {
    pub from_id: AccountId,
    pub amount: Decimal,
    pub feasible: bool,
    pub message: Option<String>,
    pub timestamp: String,
}

// ─────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceQueryResult {
    pub success: bool,
    pub account_id: AccountId,
    /// Present iff `success`.
    pub balance: Option<Decimal>,
    pub message: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionQueryResult {
    pub success: bool,
    pub account_id: AccountId,
    /// Present iff `success`.
    pub version: Option<u64>,
    pub message: Option<String>,
    pub timestamp: String,
}

/// Point-in-time staleness hint. It is not a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCheckResult {
    pub success: bool,
    pub account_id: AccountId,
    pub declared_version: u64,
    /// Meaningful only when `success`; `false` otherwise.
    pub has_conflict: bool,
    pub message: Option<String>,
    pub timestamp: String,
}

/// Local wall-clock stamp for results the client had to synthesize itself.
pub(crate) fn local_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_strategy_routes_are_distinct() {
        let paths: Vec<_> = LockStrategy::ALL.iter().map(|s| s.route().path).collect();
        assert_eq!(
            paths,
            vec!["transferir", "transferir/pessimistic", "transferir/mixed"]
        );
        assert!(LockStrategy::ALL.iter().all(|s| s.route().method == Method::POST));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Pessimistic".parse::<LockStrategy>(), Ok(LockStrategy::Pessimistic));
        assert_eq!(" mixed ".parse::<LockStrategy>(), Ok(LockStrategy::Mixed));
        assert!("both".parse::<LockStrategy>().is_err());
        assert_eq!(LockStrategy::default(), LockStrategy::Optimistic);
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        let zero = TransferIntent::new(1, 2, dec!(0), LockStrategy::Optimistic);
        assert_eq!(zero.validate(), Err(ValidationError::NonPositiveAmount(dec!(0))));

        let negative = TransferIntent::new(1, 2, dec!(-5.50), LockStrategy::Mixed);
        assert!(matches!(
            negative.validate(),
            Err(ValidationError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn test_validate_requires_both_ids() {
        let intent = TransferIntent {
            from_id: Some(1),
            to_id: None,
            amount: dec!(10),
            strategy: LockStrategy::Optimistic,
        };
        assert_eq!(intent.validate(), Err(ValidationError::MissingAccountId("toId")));
    }

    #[test]
    fn test_validate_allows_same_account() {
        // The ledger owns that rule.
        let intent = TransferIntent::new(3, 3, dec!(1), LockStrategy::Pessimistic);
        let valid = intent.validate().unwrap();
        assert_eq!(valid.from_id(), valid.to_id());
    }

    #[test]
    fn test_failure_from_status() {
        assert_eq!(TransferFailure::from_status(400), TransferFailure::Rejected);
        assert_eq!(TransferFailure::from_status(409), TransferFailure::Conflict);
        assert_eq!(TransferFailure::from_status(422), TransferFailure::BusinessRule);
        assert_eq!(TransferFailure::from_status(503), TransferFailure::Internal);
    }

    #[test]
    fn test_account_decodes_ledger_and_english_names() {
        let ledger: BenefitAccount = serde_json::from_str(
            r#"{"id":1,"nome":"Vale Refeição","descricao":"x","valor":800.5,"ativo":true,"version":3}"#,
        )
        .unwrap();
        assert_eq!(ledger.balance, dec!(800.5));
        assert_eq!(ledger.version, Some(3));

        let english: BenefitAccount = serde_json::from_str(
            r#"{"id":2,"name":"Gym","description":"","balance":0,"active":false}"#,
        )
        .unwrap();
        assert!(!english.active);
        assert_eq!(english.version, None);
    }
}
