//! ledger-node — the ledger's operational binary.
//!
//! Startup sequence:
//!   1. Connect the Postgres pool
//!   2. Build the `LedgerContext` from CLI flags
//!   3. Spawn the expiry sweeper loop (spec §4.3)
//!   4. Spawn the auto-unfreeze sweeper loop (spec §3, §6 topic
//!      `ledger-account-auto-unfrozen`)
//!   5. Spawn the velocity-log cleanup loop (spec §4.5), re-armed on a timer
//!      since `velocity::cleanup_loop` drains to zero and returns
//!   6. Wait on all three forever — this binary has no request-handling
//!      surface of its own (spec §1, HTTP/RPC explicitly out of scope); the
//!      engine is a library other services embed, and this binary only
//!      keeps its background jobs running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ledger_core::{AdvancedOptions, Currency, LedgerContext, LedgerOptions, LockMode, SystemAccounts};
use ledger_storage::PgStorage;

#[derive(Parser, Debug)]
#[command(
    name = "ledger-node",
    version,
    about = "Ledger background worker — expiry sweeper, auto-unfreeze sweeper, and velocity-log cleanup"
)]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "LEDGER_DATABASE_URL")]
    database_url: String,

    /// Maximum size of the Postgres connection pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Schema the ledger tables live in.
    #[arg(long, default_value = "public")]
    schema: String,

    /// Ledger's base currency (ISO 4217 code).
    #[arg(long, default_value = "USD")]
    currency: String,

    /// HMAC key for entry-hash/checksum computation, hex-encoded. Omit to
    /// fall back to plain SHA-256 (documented trade-off, spec §6).
    #[arg(long, env = "LEDGER_HMAC_SECRET_HEX")]
    hmac_secret_hex: Option<String>,

    /// Row-level lock mode used when resolving accounts for a posting.
    #[arg(long, value_enum, default_value_t = CliLockMode::Wait)]
    lock_mode: CliLockMode,

    /// Upper bound on a single posting's amount, in minor units.
    #[arg(long, default_value_t = i64::MAX)]
    max_transaction_amount: i64,

    /// How long an idempotency key is honored, in milliseconds.
    #[arg(long, default_value_t = ledger_core::constants::DEFAULT_IDEMPOTENCY_TTL_MS)]
    idempotency_ttl_ms: i64,

    /// Enable the batch engine code path for credit/debit requests.
    #[arg(long, default_value_t = false)]
    enable_batching: bool,

    /// How often the expiry sweeper claims expired-and-inflight holds.
    #[arg(long, default_value_t = 1_000)]
    sweeper_interval_ms: u64,

    /// Max holds the sweeper claims per pass.
    #[arg(long, default_value_t = ledger_core::constants::DEFAULT_SWEEPER_BATCH_SIZE)]
    sweeper_batch_size: i64,

    /// How often the auto-unfreeze sweeper claims frozen accounts past their
    /// auto-unfreeze deadline.
    #[arg(long, default_value_t = 60_000)]
    auto_unfreeze_interval_ms: u64,

    /// Max accounts the auto-unfreeze sweeper claims per pass.
    #[arg(long, default_value_t = ledger_core::constants::DEFAULT_SWEEPER_BATCH_SIZE)]
    auto_unfreeze_batch_size: i64,

    /// Velocity-log retention, in days, before a row is eligible for cleanup.
    #[arg(long, default_value_t = ledger_core::constants::DEFAULT_VELOCITY_RETENTION_DAYS)]
    velocity_retention_days: i64,

    /// Rows the velocity-log cleanup job deletes per batch.
    #[arg(long, default_value_t = ledger_core::constants::DEFAULT_CLEANUP_BATCH_SIZE)]
    velocity_cleanup_batch_size: i64,

    /// How often a fully-drained cleanup loop is re-armed.
    #[arg(long, default_value_t = 3_600_000)]
    velocity_cleanup_interval_ms: u64,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLockMode {
    Wait,
    NoWait,
    Optimistic,
}

impl From<CliLockMode> for LockMode {
    fn from(m: CliLockMode) -> Self {
        match m {
            CliLockMode::Wait => LockMode::Wait,
            CliLockMode::NoWait => LockMode::NoWait,
            CliLockMode::Optimistic => LockMode::Optimistic,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ledger=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("ledger-node starting");

    // ── Storage ───────────────────────────────────────────────────────────
    let storage: Arc<dyn ledger_storage::Storage> = Arc::new(
        PgStorage::connect(&args.database_url, args.max_connections)
            .await
            .context("connecting to Postgres")?,
    );

    // ── Context ───────────────────────────────────────────────────────────
    let hmac_secret = args
        .hmac_secret_hex
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("decoding --hmac-secret-hex")?;
    if hmac_secret.is_none() {
        tracing::warn!("no --hmac-secret-hex provided; entry hashes fall back to plain SHA-256");
    }

    let ctx = LedgerContext::new(LedgerOptions {
        schema: args.schema.clone(),
        currency: Currency::new(&args.currency).context("parsing --currency")?,
        advanced: AdvancedOptions {
            max_transaction_amount: args.max_transaction_amount,
            hmac_secret,
            lock_mode: args.lock_mode.into(),
            idempotency_ttl_ms: args.idempotency_ttl_ms,
            enable_batching: args.enable_batching,
        },
        system_accounts: SystemAccounts::default(),
    });

    // ── Background jobs ───────────────────────────────────────────────────
    let sweeper_ctx = ctx.clone();
    let sweeper_storage = Arc::clone(&storage);
    let sweeper = tokio::spawn(ledger_engine::sweeper::run(
        sweeper_ctx,
        sweeper_storage,
        args.sweeper_batch_size,
        Duration::from_millis(args.sweeper_interval_ms),
    ));

    let auto_unfreeze_ctx = ctx.clone();
    let auto_unfreeze_storage = Arc::clone(&storage);
    let auto_unfreeze = tokio::spawn(ledger_engine::sweeper::run_auto_unfreeze(
        auto_unfreeze_ctx,
        auto_unfreeze_storage,
        args.auto_unfreeze_batch_size,
        Duration::from_millis(args.auto_unfreeze_interval_ms),
    ));

    let retention = chrono::Duration::days(args.velocity_retention_days);
    let cleanup_batch_size = args.velocity_cleanup_batch_size;
    let cleanup_storage = Arc::clone(&storage);
    let cleanup_rearm = Duration::from_millis(args.velocity_cleanup_interval_ms);
    let cleanup = tokio::spawn(async move {
        loop {
            ledger_engine::velocity::cleanup_loop(
                Arc::clone(&cleanup_storage),
                retention,
                cleanup_batch_size,
                Duration::from_millis(50),
            )
            .await;
            tokio::time::sleep(cleanup_rearm).await;
        }
    });

    info!("ledger-node ready");
    let _ = tokio::join!(sweeper, auto_unfreeze, cleanup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_flags_with_defaults() {
        let args = Args::try_parse_from([
            "ledger-node",
            "--database-url",
            "postgres://localhost/ledger",
        ])
        .unwrap();
        assert_eq!(args.schema, "public");
        assert_eq!(args.currency, "USD");
        assert!(args.hmac_secret_hex.is_none());
        assert!(matches!(args.lock_mode, CliLockMode::Wait));
        assert_eq!(args.sweeper_batch_size, ledger_core::constants::DEFAULT_SWEEPER_BATCH_SIZE);
    }

    #[test]
    fn rejects_missing_database_url() {
        assert!(Args::try_parse_from(["ledger-node"]).is_err());
    }

    #[test]
    fn lock_mode_flag_overrides_default() {
        let args = Args::try_parse_from([
            "ledger-node",
            "--database-url",
            "postgres://localhost/ledger",
            "--lock-mode",
            "no-wait",
        ])
        .unwrap();
        assert!(matches!(args.lock_mode, CliLockMode::NoWait));
    }
}
