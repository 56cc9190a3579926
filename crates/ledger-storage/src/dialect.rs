//! Backing-store dialect abstraction (spec §6, §9 "Dialect abstraction").
//!
//! Porting the core to a new store requires reimplementing only this
//! surface plus the handful of SQL fragments it produces; everything else
//! in `ledger-engine` is written against [`LedgerTx`](crate::adapter::LedgerTx)
//! and never embeds dialect-specific SQL itself.

/// Row-level lock clause a SELECT should carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockClause {
    /// No lock clause (optimistic mode relies on the conditional UPDATE instead).
    None,
    /// `FOR UPDATE` — block on contention.
    ForUpdate,
    /// `FOR UPDATE NOWAIT` — fail immediately on contention.
    ForUpdateNoWait,
    /// `FOR UPDATE SKIP LOCKED` — used by best-effort jobs (sweeper, cleanup).
    ForUpdateSkipLocked,
}

pub trait SqlDialect: Send + Sync {
    fn lock_fragment(&self, clause: LockClause) -> &'static str;
    /// SQL fragment for "set this row's `created_at`/`now` column to the
    /// database clock", e.g. `NOW()`.
    fn now_fragment(&self) -> &'static str;
    /// SQL fragment producing an interval of `seconds` for use in a WHERE
    /// clause, e.g. `INTERVAL '90 days'`.
    fn interval_fragment(&self, seconds: i64) -> String;
    /// Statement-level isolation to request at the top of a transaction.
    fn isolation_level_statement(&self) -> &'static str;
}

/// PostgreSQL dialect — the only backing store this workspace ships a
/// concrete adapter for (spec §6 treats the dialect as a pluggable contract;
/// porting to another store means implementing this trait against it).
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn lock_fragment(&self, clause: LockClause) -> &'static str {
        match clause {
            LockClause::None => "",
            LockClause::ForUpdate => "FOR UPDATE",
            LockClause::ForUpdateNoWait => "FOR UPDATE NOWAIT",
            LockClause::ForUpdateSkipLocked => "FOR UPDATE SKIP LOCKED",
        }
    }

    fn now_fragment(&self) -> &'static str {
        "NOW()"
    }

    fn interval_fragment(&self, seconds: i64) -> String {
        format!("INTERVAL '{seconds} seconds'")
    }

    fn isolation_level_statement(&self) -> &'static str {
        "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
    }
}
