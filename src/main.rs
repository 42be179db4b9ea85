//! Benefit Console: operator front end for the remote benefit ledger.
//!
//! ```bash
//! benefit_console list
//! benefit_console transfer 1 2 40.00 --strategy pessimistic
//! BENEFIT_API_BASE=http://ledger:8080/api/v1 benefit_console balance 1 2 3
//! ```
//!
//! Logging env: BENEFIT_LOG_LEVEL, BENEFIT_LOG_DIR, BENEFIT_LOG_JSON.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use benefit_ledger_client::benefits::{
    AccountDirectory, AccountId, BalanceInspector, BenefitAccount, LockStrategy, TransferIntent,
    TransferOrchestrator, VersionInspector,
};
use benefit_ledger_client::ledger_http::{LedgerClient, LedgerConfig, DEFAULT_API_BASE};
use benefit_ledger_client::logging::{init_logging, ConsoleSettings};

const RELIST_WAIT: Duration = Duration::from_secs(10);

/// Benefit ledger operator console.
#[derive(Parser, Debug)]
#[command(name = "benefit_console")]
#[command(about = "List benefit accounts, transfer between them and inspect balances and versions")]
#[command(version)]
struct Cli {
    /// Ledger API root; accounts live at `{api_base}/beneficios`.
    #[arg(long, env = "BENEFIT_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every account with active/inactive counts
    List,

    /// Move funds between two accounts
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        /// optimistic, pessimistic or mixed
        #[arg(long, short, default_value_t)]
        strategy: LockStrategy,
    },

    /// Ask the ledger whether a transfer would currently go through
    Check { from: AccountId, amount: Decimal },

    /// Query balances, then print the recent query history
    Balance {
        #[arg(required = true)]
        ids: Vec<AccountId>,
    },

    /// Show an account's current version
    Version { id: AccountId },

    /// Compare a declared version against the ledger's
    Conflict {
        id: AccountId,
        #[arg(value_name = "VERSION")]
        declared: u64,
    },
}

fn print_accounts(accounts: &[BenefitAccount]) {
    println!("{:>4}  {:<24} {:>14}  {:<8} {:>7}", "id", "name", "balance", "status", "version");
    for a in accounts {
        println!(
            "{:>4}  {:<24} {:>14}  {:<8} {:>7}",
            a.id,
            a.name,
            a.balance.round_dp(2),
            if a.active { "active" } else { "inactive" },
            a.version.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
}

// ─────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────

async fn list(ledger: LedgerClient) -> Result<()> {
    let mut directory = AccountDirectory::new(ledger);
    let accounts = directory
        .list_accounts()
        .await
        .context("failed to load accounts")?;
    print_accounts(&accounts);
    println!(
        "{} accounts: {} active, {} inactive",
        accounts.len(),
        directory.active_count(),
        directory.inactive_count()
    );
    Ok(())
}

async fn transfer(
    ledger: LedgerClient,
    from_id: AccountId,
    to_id: AccountId,
    amount: Decimal,
    strategy: LockStrategy,
) -> Result<()> {
    let directory = AccountDirectory::new(ledger.clone());
    let mut snapshots = directory.subscribe();
    let (refresh_tx, refresh_rx) = mpsc::channel(4);
    let refresher = tokio::spawn(directory.run(refresh_rx));

    let orchestrator = TransferOrchestrator::new(ledger).with_refresh(refresh_tx);
    let outcome = orchestrator
        .execute(&TransferIntent::new(from_id, to_id, amount, strategy))
        .await?;

    println!(
        "[{}] {} {} -> {} ({}): {}",
        if outcome.success { "OK" } else { "FAILED" },
        outcome.amount,
        outcome.from_id,
        outcome.to_id,
        outcome.strategy,
        outcome.message
    );
    if let Some(failure) = outcome.failure {
        println!("  reason: {failure:?}  at {}", outcome.timestamp);
    }

    if outcome.success {
        match tokio::time::timeout(RELIST_WAIT, snapshots.changed()).await {
            Ok(Ok(())) => {
                let accounts = snapshots.borrow_and_update().clone();
                print_accounts(&accounts);
            }
            _ => warn!("account list was not refreshed after the transfer"),
        }
    }

    // Closing the refresh channel stops the directory loop.
    drop(orchestrator);
    let _ = refresher.await;
    Ok(())
}

async fn check(ledger: LedgerClient, from_id: AccountId, amount: Decimal) -> Result<()> {
    let result = TransferOrchestrator::new(ledger)
        .verify_feasibility(from_id, amount)
        .await;
    println!(
        "transfer of {} from {}: {}{}",
        result.amount,
        result.from_id,
        if result.feasible { "possible" } else { "not possible" },
        result.message.map(|m| format!(" ({m})")).unwrap_or_default()
    );
    Ok(())
}

async fn balance(ledger: LedgerClient, ids: Vec<AccountId>) -> Result<()> {
    let mut inspector = BalanceInspector::new(ledger);
    for id in ids {
        let result = inspector.get_balance(id).await;
        match result.balance {
            Some(balance) if result.success => {
                println!("#{}: {} at {}", result.account_id, balance.round_dp(2), result.timestamp)
            }
            _ => println!(
                "#{}: {}",
                result.account_id,
                result.message.unwrap_or_default()
            ),
        }
    }

    println!("recent queries:");
    for entry in inspector.history() {
        println!(
            "  #{} {} ({})",
            entry.account_id,
            entry.balance.unwrap_or_default().round_dp(2),
            entry.timestamp
        );
    }
    Ok(())
}

async fn version(ledger: LedgerClient, id: AccountId) -> Result<()> {
    let result = VersionInspector::new(ledger).get_version(id).await;
    match result.version {
        Some(v) if result.success => println!("#{}: version {v}", result.account_id),
        _ => println!("#{}: {}", result.account_id, result.message.unwrap_or_default()),
    }
    Ok(())
}

async fn conflict(ledger: LedgerClient, id: AccountId, declared: u64) -> Result<()> {
    let result = VersionInspector::new(ledger).check_conflict(id, declared).await;
    if result.success {
        println!(
            "#{} version {}: {}",
            result.account_id,
            result.declared_version,
            if result.has_conflict { "CONFLICT" } else { "up to date" }
        );
    } else {
        println!("#{}: {}", result.account_id, result.message.unwrap_or_default());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(&ConsoleSettings::from_env());

    let cfg = LedgerConfig {
        api_base: cli.api_base,
    };
    let ledger = LedgerClient::new(&cfg)
        .with_context(|| format!("invalid ledger API base: {}", cfg.api_base))?;
    info!("🔗 Ledger at {}", ledger.collection_url());

    match cli.command {
        Command::List => list(ledger).await,
        Command::Transfer {
            from,
            to,
            amount,
            strategy,
        } => transfer(ledger, from, to, amount, strategy).await,
        Command::Check { from, amount } => check(ledger, from, amount).await,
        Command::Balance { ids } => balance(ledger, ids).await,
        Command::Version { id } => version(ledger, id).await,
        Command::Conflict { id, declared } => conflict(ledger, id, declared).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_transfer_defaults_to_optimistic() {
        let cli = Cli::try_parse_from(["benefit_console", "transfer", "1", "2", "40.50"]).unwrap();
        match cli.command {
            Command::Transfer {
                from,
                to,
                amount,
                strategy,
            } => {
                assert_eq!((from, to, amount), (1, 2, dec!(40.50)));
                assert_eq!(strategy, LockStrategy::Optimistic);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_transfer_strategy_and_bad_input() {
        let cli = Cli::try_parse_from([
            "benefit_console", "transfer", "1", "2", "5", "--strategy", "Mixed",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Transfer { strategy: LockStrategy::Mixed, .. }
        ));

        assert!(Cli::try_parse_from(["benefit_console", "transfer", "1", "2"]).is_err());
        assert!(Cli::try_parse_from(["benefit_console", "transfer", "1", "2", "abc"]).is_err());
        assert!(Cli::try_parse_from([
            "benefit_console", "transfer", "1", "2", "5", "--strategy", "eventual",
        ])
        .is_err());
    }

    #[test]
    fn test_balance_needs_at_least_one_id() {
        assert!(Cli::try_parse_from(["benefit_console", "balance"]).is_err());
        let cli = Cli::try_parse_from(["benefit_console", "balance", "1", "3"]).unwrap();
        assert!(matches!(cli.command, Command::Balance { ids } if ids == vec![1, 3]));
    }
}
