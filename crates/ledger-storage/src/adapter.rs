//! The backing-store contract (spec §6 "Backing store contract").
//!
//! `Storage::begin` opens one backing-store transaction and hands back a
//! boxed [`LedgerTx`]; every method on it runs inside that transaction.
//! Callers commit explicitly; dropping the handle without committing rolls
//! back (for the Postgres adapter this falls out of `sqlx::Transaction`'s
//! `Drop` impl; the in-memory fake mirrors it explicitly).

use async_trait::async_trait;
use uuid::Uuid;

use ledger_core::{
    Account, AccountLimit, Entry, EntryType, IdempotencyRecord, LedgerId, LedgerError,
    LockMode, OutboxEntry, Result, Timestamp, Transfer, EntityStatusLogEntry,
};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;
}

/// Everything the engine needs from one open backing-store transaction.
///
/// Grouped in spec order: Account Resolver, Poster, Transfer, Idempotency,
/// Outbox, Velocity, Holds/Sweeper, Status log, clock.
#[async_trait]
pub trait LedgerTx: Send {
    // ── Account Resolver (spec §4.1) ────────────────────────────────────────
    async fn lock_account_by_holder(
        &mut self,
        ledger: LedgerId,
        holder_id: &str,
        mode: LockMode,
    ) -> Result<Option<Account>>;

    async fn lock_account_by_system_id(
        &mut self,
        ledger: LedgerId,
        system_identifier: &str,
        mode: LockMode,
    ) -> Result<Option<Account>>;

    async fn lock_account_by_id(&mut self, account_id: Uuid, mode: LockMode) -> Result<Option<Account>>;

    async fn get_account_readonly(&mut self, ledger: LedgerId, holder_id: &str) -> Result<Option<Account>>;

    // ── Entry/Balance Poster (spec §4.4) ────────────────────────────────────
    /// `UPDATE accounts SET ... WHERE id = ? AND version = expected`.
    /// Returns `false` (zero rows affected) on version drift.
    async fn update_account_conditional(&mut self, account: &Account, expected_version: i64) -> Result<bool>;

    async fn insert_entry(&mut self, entry: &Entry) -> Result<()>;

    async fn last_entry_for_account(&mut self, account_id: Uuid) -> Result<Option<Entry>>;

    async fn next_sequence_number(&mut self, ledger: LedgerId) -> Result<i64>;

    // ── Transfer lifecycle ───────────────────────────────────────────────────
    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<()>;

    async fn update_transfer(&mut self, transfer: &Transfer) -> Result<()>;

    async fn get_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>>;

    async fn lock_transfer(&mut self, id: Uuid, mode: LockMode) -> Result<Option<Transfer>>;

    async fn entries_for_transfer(&mut self, transfer_id: Uuid) -> Result<Vec<Entry>>;

    async fn find_transfer_by_reference(&mut self, ledger: LedgerId, reference: &str) -> Result<Option<Transfer>>;

    // ── Idempotency (spec §4.6) ──────────────────────────────────────────────
    async fn check_idempotency_key(&mut self, ledger: LedgerId, key: &str) -> Result<Option<IdempotencyRecord>>;

    async fn save_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<()>;

    // ── Outbox (spec §4.8) ───────────────────────────────────────────────────
    async fn append_outbox(&mut self, entry: &OutboxEntry) -> Result<()>;

    // ── Velocity (spec §4.5) ─────────────────────────────────────────────────
    async fn sum_entries_since(
        &mut self,
        account_id: Uuid,
        entry_type: Option<EntryType>,
        category: Option<&str>,
        since: Timestamp,
    ) -> Result<i64>;

    async fn get_limits(&mut self, account_id: Uuid) -> Result<Vec<AccountLimit>>;

    async fn delete_velocity_log_older_than(&mut self, cutoff: Timestamp, batch_size: i64) -> Result<u64>;

    // ── Holds / Expiry sweeper (spec §4.3) ───────────────────────────────────
    async fn select_expired_inflight_holds(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Transfer>>;

    /// `list_active_holds`/`list_all_holds` (spec §4.3). `active_only` selects
    /// `is_hold = true AND status = 'inflight'`; otherwise all holds for the
    /// account regardless of status.
    async fn list_holds_for_account(&mut self, account_id: Uuid, active_only: bool) -> Result<Vec<Transfer>>;

    // ── Entity status log ────────────────────────────────────────────────────
    async fn append_status_log(&mut self, entry: &EntityStatusLogEntry) -> Result<()>;

    // ── Account lifecycle / auto-unfreeze sweeper ────────────────────────────
    /// Selects frozen accounts whose `status_meta.auto_unfreeze_at` is due,
    /// locked `FOR UPDATE SKIP LOCKED` so concurrent sweeper instances never
    /// race the same row (mirrors [`select_expired_inflight_holds`]).
    async fn select_accounts_due_for_auto_unfreeze(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Account>>;

    // ── Clock ────────────────────────────────────────────────────────────────
    async fn db_now(&mut self) -> Result<Timestamp>;

    // ── Transaction boundary ─────────────────────────────────────────────────
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Helper: translate a failed conditional update into the standard
/// `resource_busy` error (spec §4.4 "Conditional update").
pub fn resource_busy(what: &str) -> LedgerError {
    LedgerError::ResourceBusy(format!("{what}: version drift, zero rows affected"))
}
