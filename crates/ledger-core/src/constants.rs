//! ─── Ledger constants ───────────────────────────────────────────────────────

/// Default conventional system account used as counterparty for pure
/// credits/debits (spec §3, §4.2).
pub const DEFAULT_WORLD_ACCOUNT: &str = "@World";

/// Default velocity-log retention in days (spec §4.5).
pub const DEFAULT_VELOCITY_RETENTION_DAYS: i64 = 90;

/// Upper bound on an exchange rate, scaled by `EXCHANGE_RATE_SCALE` (spec §4.2).
pub const MAX_EXCHANGE_RATE: i64 = 1_000_000_000;

/// Default idempotency key TTL in milliseconds (24 hours).
pub const DEFAULT_IDEMPOTENCY_TTL_MS: i64 = 86_400_000;

/// Default batch engine thresholds (spec §4.7).
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10;

/// Default bound on the number of expired holds the sweeper claims per pass
/// (spec §4.3, "selects at most N expired-and-inflight holds").
pub const DEFAULT_SWEEPER_BATCH_SIZE: i64 = 200;

/// Default number of rows the velocity-log cleanup job deletes per batch
/// before pausing (spec §4.5).
pub const DEFAULT_CLEANUP_BATCH_SIZE: i64 = 1_000;
