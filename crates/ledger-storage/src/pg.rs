//! PostgreSQL adapter: the concrete [`Storage`]/[`LedgerTx`] implementation
//! used in production, grounded on the sqlx/Postgres patterns in
//! `nimeshk03-hpc_pay_settlement_engine/src/services/ledger_service.rs`
//! (runtime `query_as`/`query` with explicit `.bind(...)` calls rather than
//! the compile-time `query!` macros, since those require a live database at
//! build time).

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use ledger_core::{
    Account, AccountLimit, AccountStatus, Currency, Entry, EntryType, FxFields, HolderType,
    IdempotencyRecord, LedgerError, LedgerId, LimitType, LockMode, OutboxEntry, Result,
    StatusChangeMeta, Timestamp, Transfer, TransferStatus, TransferType, EntityStatusLogEntry,
};

use crate::adapter::{resource_busy, LedgerTx, Storage};
use crate::dialect::{LockClause, PostgresDialect, SqlDialect};

fn storage_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn lock_clause_for(mode: LockMode) -> LockClause {
    match mode {
        LockMode::Wait => LockClause::ForUpdate,
        LockMode::NoWait => LockClause::ForUpdateNoWait,
        LockMode::Optimistic => LockClause::None,
    }
}

/// Builds a `PgPool` and wraps it behind the [`Storage`] contract.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage_err)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let mut tx: Transaction<'static, Postgres> = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query(PostgresDialect.isolation_level_statement())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        Ok(Box::new(PgLedgerTx { tx: Some(tx) }))
    }
}

pub struct PgLedgerTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgLedgerTx {
    fn conn(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| LedgerError::Internal("transaction already committed".to_string()))
    }
}

// ── Row mapping helpers ──────────────────────────────────────────────────────
// Manual mapping rather than `#[derive(sqlx::FromRow)]` because several
// domain fields (`Currency`, `LedgerId`, `StatusChangeMeta`) are not
// primitive sqlx column types.

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account> {
    let currency: String = row.try_get("currency").map_err(storage_err)?;
    let status_reason: Option<String> = row.try_get("status_reason").map_err(storage_err)?;
    let status_at: Option<Timestamp> = row.try_get("status_changed_at").map_err(storage_err)?;
    let auto_unfreeze_at: Option<Timestamp> = row.try_get("status_auto_unfreeze_at").map_err(storage_err)?;
    Ok(Account {
        id: row.try_get("id").map_err(storage_err)?,
        ledger_id: LedgerId(row.try_get("ledger_id").map_err(storage_err)?),
        holder_id: row.try_get("holder_id").map_err(storage_err)?,
        system_identifier: row.try_get("system_identifier").map_err(storage_err)?,
        is_system: row.try_get("is_system").map_err(storage_err)?,
        holder_type: row.try_get("holder_type").map_err(storage_err)?,
        currency: Currency::new(currency).ok_or_else(|| LedgerError::Internal("bad currency in row".into()))?,
        status: row.try_get("status").map_err(storage_err)?,
        allow_overdraft: row.try_get("allow_overdraft").map_err(storage_err)?,
        overdraft_limit: row.try_get("overdraft_limit").map_err(storage_err)?,
        balance: row.try_get("balance").map_err(storage_err)?,
        credit_balance: row.try_get("credit_balance").map_err(storage_err)?,
        debit_balance: row.try_get("debit_balance").map_err(storage_err)?,
        pending_debit: row.try_get("pending_debit").map_err(storage_err)?,
        pending_credit: row.try_get("pending_credit").map_err(storage_err)?,
        version: row.try_get("version").map_err(storage_err)?,
        checksum: row.try_get("checksum").map_err(storage_err)?,
        status_meta: status_at.map(|at| StatusChangeMeta { reason: status_reason, at, auto_unfreeze_at }),
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<Transfer> {
    let currency: String = row.try_get("currency").map_err(storage_err)?;
    Ok(Transfer {
        id: row.try_get("id").map_err(storage_err)?,
        ledger_id: LedgerId(row.try_get("ledger_id").map_err(storage_err)?),
        transfer_type: row.try_get("type").map_err(storage_err)?,
        status: row.try_get("status").map_err(storage_err)?,
        reference: row.try_get("reference").map_err(storage_err)?,
        amount: row.try_get("amount").map_err(storage_err)?,
        currency: Currency::new(currency).ok_or_else(|| LedgerError::Internal("bad currency in row".into()))?,
        description: row.try_get("description").map_err(storage_err)?,
        source_account_id: row.try_get("source_account_id").map_err(storage_err)?,
        destination_account_id: row.try_get("destination_account_id").map_err(storage_err)?,
        correlation_id: row.try_get("correlation_id").map_err(storage_err)?,
        metadata: row.try_get("metadata").map_err(storage_err)?,
        is_hold: row.try_get("is_hold").map_err(storage_err)?,
        hold_expires_at: row.try_get("hold_expires_at").map_err(storage_err)?,
        parent_id: row.try_get("parent_id").map_err(storage_err)?,
        is_reversal: row.try_get("is_reversal").map_err(storage_err)?,
        committed_amount: row.try_get("committed_amount").map_err(storage_err)?,
        refunded_amount: row.try_get("refunded_amount").map_err(storage_err)?,
        effective_date: row.try_get("effective_date").map_err(storage_err)?,
        posted_at: row.try_get("posted_at").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<Entry> {
    let currency: String = row.try_get("currency").map_err(storage_err)?;
    let fx_source_currency: Option<String> = row.try_get("fx_source_currency").map_err(storage_err)?;
    Ok(Entry {
        id: row.try_get("id").map_err(storage_err)?,
        transfer_id: row.try_get("transfer_id").map_err(storage_err)?,
        account_id: row.try_get("account_id").map_err(storage_err)?,
        entry_type: row.try_get("entry_type").map_err(storage_err)?,
        amount: row.try_get("amount").map_err(storage_err)?,
        currency: Currency::new(currency).ok_or_else(|| LedgerError::Internal("bad currency in row".into()))?,
        sequence_number: row.try_get("sequence_number").map_err(storage_err)?,
        balance_before: row.try_get("balance_before").map_err(storage_err)?,
        balance_after: row.try_get("balance_after").map_err(storage_err)?,
        account_version: row.try_get("account_version").map_err(storage_err)?,
        prev_hash: row.try_get("prev_hash").map_err(storage_err)?,
        hash: row.try_get("hash").map_err(storage_err)?,
        is_hot: row.try_get("is_hot").map_err(storage_err)?,
        effective_date: row.try_get("effective_date").map_err(storage_err)?,
        fx: FxFields {
            source_currency: fx_source_currency.and_then(Currency::new),
            exchange_rate: row.try_get("fx_exchange_rate").map_err(storage_err)?,
        },
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, ledger_id, holder_id, system_identifier, is_system, holder_type, \
    currency, status, allow_overdraft, overdraft_limit, balance, credit_balance, debit_balance, \
    pending_debit, pending_credit, version, checksum, status_reason, status_changed_at, \
    status_auto_unfreeze_at, created_at";

const TRANSFER_COLUMNS: &str = "id, ledger_id, type, status, reference, amount, currency, description, \
    source_account_id, destination_account_id, correlation_id, metadata, is_hold, hold_expires_at, \
    parent_id, is_reversal, committed_amount, refunded_amount, effective_date, posted_at, created_at";

const ENTRY_COLUMNS: &str = "id, transfer_id, account_id, entry_type, amount, currency, sequence_number, \
    balance_before, balance_after, account_version, prev_hash, hash, is_hot, effective_date, \
    fx_source_currency, fx_exchange_rate, created_at";

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account_by_holder(
        &mut self,
        ledger: LedgerId,
        holder_id: &str,
        mode: LockMode,
    ) -> Result<Option<Account>> {
        let lock = PostgresDialect.lock_fragment(lock_clause_for(mode));
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE ledger_id = $1 AND holder_id = $2 {lock}"
        );
        let row = sqlx::query(&sql)
            .bind(ledger.0)
            .bind(holder_id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03") => {
                    resource_busy("lock_account_by_holder")
                }
                other => storage_err(other),
            })?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn lock_account_by_system_id(
        &mut self,
        ledger: LedgerId,
        system_identifier: &str,
        mode: LockMode,
    ) -> Result<Option<Account>> {
        let lock = PostgresDialect.lock_fragment(lock_clause_for(mode));
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE ledger_id = $1 AND system_identifier = $2 {lock}"
        );
        let row = sqlx::query(&sql)
            .bind(ledger.0)
            .bind(system_identifier)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn lock_account_by_id(&mut self, account_id: Uuid, mode: LockMode) -> Result<Option<Account>> {
        let lock = PostgresDialect.lock_fragment(lock_clause_for(mode));
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 {lock}");
        let row = sqlx::query(&sql)
            .bind(account_id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_account_readonly(&mut self, ledger: LedgerId, holder_id: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE ledger_id = $1 AND holder_id = $2");
        let row = sqlx::query(&sql)
            .bind(ledger.0)
            .bind(holder_id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn update_account_conditional(&mut self, account: &Account, expected_version: i64) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE accounts SET balance = $1, credit_balance = $2, debit_balance = $3, \
             pending_debit = $4, pending_credit = $5, version = $6, checksum = $7, status = $8, \
             status_reason = $9, status_changed_at = $10, status_auto_unfreeze_at = $11 \
             WHERE id = $12 AND version = $13",
        )
        .bind(account.balance)
        .bind(account.credit_balance)
        .bind(account.debit_balance)
        .bind(account.pending_debit)
        .bind(account.pending_credit)
        .bind(account.version)
        .bind(&account.checksum)
        .bind(account.status)
        .bind(account.status_meta.as_ref().and_then(|m| m.reason.clone()))
        .bind(account.status_meta.as_ref().map(|m| m.at))
        .bind(account.status_meta.as_ref().and_then(|m| m.auto_unfreeze_at))
        .bind(account.id)
        .bind(expected_version)
        .execute(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn insert_entry(&mut self, entry: &Entry) -> Result<()> {
        let sql = format!(
            "INSERT INTO entries ({ENTRY_COLUMNS}) VALUES \
             ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)"
        );
        sqlx::query(&sql)
            .bind(entry.id)
            .bind(entry.transfer_id)
            .bind(entry.account_id)
            .bind(entry.entry_type)
            .bind(entry.amount)
            .bind(entry.currency.as_str())
            .bind(entry.sequence_number)
            .bind(entry.balance_before)
            .bind(entry.balance_after)
            .bind(entry.account_version)
            .bind(&entry.prev_hash)
            .bind(&entry.hash)
            .bind(entry.is_hot)
            .bind(entry.effective_date)
            .bind(entry.fx.source_currency.as_ref().map(|c| c.as_str().to_string()))
            .bind(entry.fx.exchange_rate)
            .bind(entry.created_at)
            .execute(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn last_entry_for_account(&mut self, account_id: Uuid) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 \
             ORDER BY sequence_number DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn next_sequence_number(&mut self, ledger: LedgerId) -> Result<i64> {
        let row = sqlx::query("SELECT nextval('entry_sequence_' || $1::text) AS seq")
            .bind(ledger.0.to_string())
            .fetch_one(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.try_get::<i64, _>("seq").map_err(storage_err)
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<()> {
        let sql = format!(
            "INSERT INTO transfers ({TRANSFER_COLUMNS}) VALUES \
             ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)"
        );
        sqlx::query(&sql)
            .bind(transfer.id)
            .bind(transfer.ledger_id.0)
            .bind(transfer.transfer_type)
            .bind(transfer.status)
            .bind(&transfer.reference)
            .bind(transfer.amount)
            .bind(transfer.currency.as_str())
            .bind(&transfer.description)
            .bind(transfer.source_account_id)
            .bind(transfer.destination_account_id)
            .bind(transfer.correlation_id)
            .bind(&transfer.metadata)
            .bind(transfer.is_hold)
            .bind(transfer.hold_expires_at)
            .bind(transfer.parent_id)
            .bind(transfer.is_reversal)
            .bind(transfer.committed_amount)
            .bind(transfer.refunded_amount)
            .bind(transfer.effective_date)
            .bind(transfer.posted_at)
            .bind(transfer.created_at)
            .execute(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn update_transfer(&mut self, transfer: &Transfer) -> Result<()> {
        sqlx::query(
            "UPDATE transfers SET status = $1, committed_amount = $2, refunded_amount = $3, \
             posted_at = $4, metadata = $5 WHERE id = $6",
        )
        .bind(transfer.status)
        .bind(transfer.committed_amount)
        .bind(transfer.refunded_amount)
        .bind(transfer.posted_at)
        .bind(&transfer.metadata)
        .bind(transfer.id)
        .execute(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn lock_transfer(&mut self, id: Uuid, mode: LockMode) -> Result<Option<Transfer>> {
        let lock = PostgresDialect.lock_fragment(lock_clause_for(mode));
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1 {lock}");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03") => resource_busy("lock_transfer"),
                other => storage_err(other),
            })?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn entries_for_transfer(&mut self, transfer_id: Uuid) -> Result<Vec<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE transfer_id = $1 ORDER BY sequence_number");
        let rows = sqlx::query(&sql)
            .bind(transfer_id)
            .fetch_all(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn find_transfer_by_reference(&mut self, ledger: LedgerId, reference: &str) -> Result<Option<Transfer>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE ledger_id = $1 AND reference = $2");
        let row = sqlx::query(&sql)
            .bind(ledger.0)
            .bind(reference)
            .fetch_optional(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn check_idempotency_key(&mut self, ledger: LedgerId, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT ledger_id, key, reference, cached_result, expires_at FROM idempotency_keys \
             WHERE ledger_id = $1 AND key = $2",
        )
        .bind(ledger.0)
        .bind(key)
        .fetch_optional(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;

        row.map(|r| -> Result<IdempotencyRecord> {
            Ok(IdempotencyRecord {
                ledger_id: LedgerId(r.try_get("ledger_id").map_err(storage_err)?),
                key: r.try_get("key").map_err(storage_err)?,
                reference: r.try_get("reference").map_err(storage_err)?,
                cached_result: r.try_get("cached_result").map_err(storage_err)?,
                expires_at: r.try_get("expires_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn save_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<()> {
        // ON CONFLICT DO UPDATE — the dialect's upsert fragment (spec §6).
        sqlx::query(
            "INSERT INTO idempotency_keys (ledger_id, key, reference, cached_result, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (ledger_id, key) DO UPDATE SET \
               reference = EXCLUDED.reference, cached_result = EXCLUDED.cached_result, \
               expires_at = EXCLUDED.expires_at",
        )
        .bind(record.ledger_id.0)
        .bind(&record.key)
        .bind(&record.reference)
        .bind(&record.cached_result)
        .bind(record.expires_at)
        .execute(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn append_outbox(&mut self, entry: &OutboxEntry) -> Result<()> {
        sqlx::query("INSERT INTO outbox (id, topic, payload, created_at) VALUES ($1, $2, $3, $4)")
            .bind(entry.id)
            .bind(&entry.topic)
            .bind(&entry.payload)
            .bind(entry.created_at)
            .execute(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn sum_entries_since(
        &mut self,
        account_id: Uuid,
        entry_type: Option<EntryType>,
        category: Option<&str>,
        since: Timestamp,
    ) -> Result<i64> {
        // Single conditional aggregation (spec §4.5): filters fold into the
        // WHERE clause rather than issuing one query per optional filter.
        let row = sqlx::query(
            "SELECT COALESCE(SUM(e.amount), 0)::bigint AS total \
             FROM entries e JOIN transfers t ON t.id = e.transfer_id \
             WHERE e.account_id = $1 AND e.created_at >= $2 \
               AND ($3::entry_type IS NULL OR e.entry_type = $3) \
               AND ($4::text IS NULL OR t.metadata ->> 'category' = $4)",
        )
        .bind(account_id)
        .bind(since)
        .bind(entry_type)
        .bind(category)
        .fetch_one(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;
        row.try_get::<i64, _>("total").map_err(storage_err)
    }

    async fn get_limits(&mut self, account_id: Uuid) -> Result<Vec<AccountLimit>> {
        let rows = sqlx::query(
            "SELECT account_id, limit_type, category, max_amount, enabled FROM account_limits \
             WHERE account_id = $1 AND enabled = true",
        )
        .bind(account_id)
        .fetch_all(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| -> Result<AccountLimit> {
                Ok(AccountLimit {
                    account_id: r.try_get("account_id").map_err(storage_err)?,
                    limit_type: r.try_get::<LimitType, _>("limit_type").map_err(storage_err)?,
                    category: r.try_get("category").map_err(storage_err)?,
                    max_amount: r.try_get("max_amount").map_err(storage_err)?,
                    enabled: r.try_get("enabled").map_err(storage_err)?,
                })
            })
            .collect()
    }

    async fn delete_velocity_log_older_than(&mut self, cutoff: Timestamp, batch_size: i64) -> Result<u64> {
        let affected = sqlx::query(
            "DELETE FROM entries WHERE ctid IN ( \
               SELECT ctid FROM entries WHERE created_at < $1 LIMIT $2 \
             )",
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?
        .rows_affected();
        Ok(affected)
    }

    async fn select_expired_inflight_holds(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Transfer>> {
        let skip_locked = PostgresDialect.lock_fragment(LockClause::ForUpdateSkipLocked);
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE is_hold = true AND status = 'inflight' AND hold_expires_at <= $1 \
             ORDER BY hold_expires_at LIMIT $2 {skip_locked}"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_transfer).collect()
    }

    async fn list_holds_for_account(&mut self, account_id: Uuid, active_only: bool) -> Result<Vec<Transfer>> {
        let status_filter = if active_only { "AND status = 'inflight'" } else { "" };
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE is_hold = true AND (source_account_id = $1 OR destination_account_id = $1) \
             {status_filter} ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_transfer).collect()
    }

    async fn append_status_log(&mut self, entry: &EntityStatusLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO entity_status_log (id, entity_type, entity_id, previous_status, status, reason, at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.previous_status)
        .bind(&entry.status)
        .bind(&entry.reason)
        .bind(entry.at)
        .execute(self.conn()?.as_mut())
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn select_accounts_due_for_auto_unfreeze(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Account>> {
        let skip_locked = PostgresDialect.lock_fragment(LockClause::ForUpdateSkipLocked);
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE status = 'frozen' AND status_auto_unfreeze_at <= $1 \
             ORDER BY status_auto_unfreeze_at LIMIT $2 {skip_locked}"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_account).collect()
    }

    async fn db_now(&mut self) -> Result<Timestamp> {
        let row = sqlx::query("SELECT NOW() AS now")
            .fetch_one(self.conn()?.as_mut())
            .await
            .map_err(storage_err)?;
        row.try_get("now").map_err(storage_err)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| LedgerError::Internal("transaction already committed".to_string()))?;
        tx.commit().await.map_err(storage_err)
    }
}
