//! In-memory benefit ledger for local demos of `benefit_console`.
//!
//! Env: LEDGER_STUB_ADDR (default 127.0.0.1:8080).

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use benefit_ledger_client::stub_ledger::{self, StubLedger};

#[derive(Debug, Clone)]
struct StubSettings {
    addr: SocketAddr,
}

impl StubSettings {
    fn from_env() -> Result<Self> {
        let raw = env::var("LEDGER_STUB_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());
        Ok(Self {
            addr: raw
                .parse()
                .with_context(|| format!("invalid LEDGER_STUB_ADDR: {raw}"))?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = StubSettings::from_env()?;
    stub_ledger::serve(StubLedger::demo(), settings.addr)
        .await
        .context("stub ledger stopped")
}
