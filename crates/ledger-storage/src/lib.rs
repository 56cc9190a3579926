//! `ledger-storage` — the backing-store contract and its two implementations:
//! [`pg::PgStorage`] for production, [`fake::FakeStorage`] for tests.

pub mod adapter;
pub mod dialect;
pub mod fake;
pub mod pg;

pub use adapter::{resource_busy, LedgerTx, Storage};
pub use dialect::{LockClause, PostgresDialect, SqlDialect};
pub use fake::FakeStorage;
pub use pg::PgStorage;
