//! In-memory [`Storage`] test double.
//!
//! Used by `ledger-engine`'s unit and integration tests so they exercise real
//! orchestration logic without a live Postgres instance. `begin` snapshots the
//! whole store; `commit` swaps the snapshot back in; dropping the handle
//! without committing discards it — the same rollback-on-drop contract the
//! Postgres adapter gets for free from `sqlx::Transaction`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use ledger_core::{
    Account, AccountLimit, EntityStatusLogEntry, Entry, EntryType, IdempotencyRecord, LedgerError,
    LedgerId, LockMode, OutboxEntry, Result, Timestamp, Transfer,
};

use crate::adapter::{resource_busy, LedgerTx, Storage};

#[derive(Clone, Default)]
struct FakeDb {
    accounts: HashMap<Uuid, Account>,
    transfers: HashMap<Uuid, Transfer>,
    entries: Vec<Entry>,
    idempotency: HashMap<(LedgerId, String), IdempotencyRecord>,
    outbox: Vec<OutboxEntry>,
    limits: HashMap<Uuid, Vec<AccountLimit>>,
    status_log: Vec<EntityStatusLogEntry>,
    sequence: i64,
    /// Account ids currently "locked" by an in-flight fake transaction, so a
    /// second `begin()` attempting `LockMode::NoWait` on the same row fails
    /// the way `FOR UPDATE NOWAIT` would against a real contending session.
    locked: std::collections::HashSet<Uuid>,
}

/// Seedable, clonable in-memory store. Tests construct one `FakeStorage`,
/// seed accounts/limits through [`FakeStorage::seed_account`] etc., then
/// hand it to the code under test.
#[derive(Clone)]
pub struct FakeStorage {
    db: Arc<Mutex<FakeDb>>,
    now: Arc<Mutex<Timestamp>>,
}

impl FakeStorage {
    pub fn new(now: Timestamp) -> Self {
        Self {
            db: Arc::new(Mutex::new(FakeDb::default())),
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub async fn set_now(&self, now: Timestamp) {
        *self.now.lock().await = now;
    }

    pub async fn seed_account(&self, account: Account) {
        self.db.lock().await.accounts.insert(account.id, account);
    }

    pub async fn seed_limit(&self, limit: AccountLimit) {
        self.db.lock().await.limits.entry(limit.account_id).or_default().push(limit);
    }

    pub async fn account(&self, id: Uuid) -> Option<Account> {
        self.db.lock().await.accounts.get(&id).cloned()
    }

    pub async fn transfer(&self, id: Uuid) -> Option<Transfer> {
        self.db.lock().await.transfers.get(&id).cloned()
    }

    pub async fn all_entries(&self) -> Vec<Entry> {
        self.db.lock().await.entries.clone()
    }

    pub async fn outbox(&self) -> Vec<OutboxEntry> {
        self.db.lock().await.outbox.clone()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let snapshot = self.db.lock().await.clone();
        let now = *self.now.lock().await;
        Ok(Box::new(FakeLedgerTx {
            store: self.db.clone(),
            working: snapshot,
            now,
            held_locks: Vec::new(),
            committed: false,
        }))
    }
}

pub struct FakeLedgerTx {
    store: Arc<Mutex<FakeDb>>,
    working: FakeDb,
    now: Timestamp,
    held_locks: Vec<Uuid>,
    committed: bool,
}

impl FakeLedgerTx {
    async fn try_lock(&mut self, id: Uuid, mode: LockMode) -> Result<()> {
        if mode == LockMode::Optimistic {
            return Ok(());
        }
        let mut db = self.store.lock().await;
        if db.locked.contains(&id) {
            return match mode {
                LockMode::NoWait => Err(resource_busy("account row")),
                // `Wait` would block on a real store; the fake has no
                // contention queue, so it degrades to an immediate failure
                // rather than deadlocking a single-threaded test.
                LockMode::Wait => Err(resource_busy("account row")),
                LockMode::Optimistic => unreachable!(),
            };
        }
        db.locked.insert(id);
        self.held_locks.push(id);
        Ok(())
    }
}

impl Drop for FakeLedgerTx {
    fn drop(&mut self) {
        if !self.committed {
            let store = self.store.clone();
            let locks = std::mem::take(&mut self.held_locks);
            tokio::spawn(async move {
                let mut db = store.lock().await;
                for id in locks {
                    db.locked.remove(&id);
                }
            });
        }
    }
}

#[async_trait]
impl LedgerTx for FakeLedgerTx {
    async fn lock_account_by_holder(
        &mut self,
        ledger: LedgerId,
        holder_id: &str,
        mode: LockMode,
    ) -> Result<Option<Account>> {
        let found = self
            .working
            .accounts
            .values()
            .find(|a| a.ledger_id == ledger && a.holder_id.as_deref() == Some(holder_id))
            .cloned();
        if let Some(a) = &found {
            self.try_lock(a.id, mode).await?;
        }
        Ok(found)
    }

    async fn lock_account_by_system_id(
        &mut self,
        ledger: LedgerId,
        system_identifier: &str,
        mode: LockMode,
    ) -> Result<Option<Account>> {
        let found = self
            .working
            .accounts
            .values()
            .find(|a| a.ledger_id == ledger && a.system_identifier.as_deref() == Some(system_identifier))
            .cloned();
        if let Some(a) = &found {
            self.try_lock(a.id, mode).await?;
        }
        Ok(found)
    }

    async fn lock_account_by_id(&mut self, account_id: Uuid, mode: LockMode) -> Result<Option<Account>> {
        let found = self.working.accounts.get(&account_id).cloned();
        if found.is_some() {
            self.try_lock(account_id, mode).await?;
        }
        Ok(found)
    }

    async fn get_account_readonly(&mut self, ledger: LedgerId, holder_id: &str) -> Result<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.ledger_id == ledger && a.holder_id.as_deref() == Some(holder_id))
            .cloned())
    }

    async fn update_account_conditional(&mut self, account: &Account, expected_version: i64) -> Result<bool> {
        match self.working.accounts.get(&account.id) {
            Some(current) if current.version == expected_version => {
                self.working.accounts.insert(account.id, account.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LedgerError::NotFound(format!("account {}", account.id))),
        }
    }

    async fn insert_entry(&mut self, entry: &Entry) -> Result<()> {
        self.working.entries.push(entry.clone());
        Ok(())
    }

    async fn last_entry_for_account(&mut self, account_id: Uuid) -> Result<Option<Entry>> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .max_by_key(|e| e.sequence_number)
            .cloned())
    }

    async fn next_sequence_number(&mut self, _ledger: LedgerId) -> Result<i64> {
        self.working.sequence += 1;
        Ok(self.working.sequence)
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<()> {
        self.working.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn update_transfer(&mut self, transfer: &Transfer) -> Result<()> {
        self.working.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn get_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>> {
        Ok(self.working.transfers.get(&id).cloned())
    }

    async fn lock_transfer(&mut self, id: Uuid, mode: LockMode) -> Result<Option<Transfer>> {
        let found = self.working.transfers.get(&id).cloned();
        if found.is_some() {
            self.try_lock(id, mode).await?;
        }
        Ok(found)
    }

    async fn entries_for_transfer(&mut self, transfer_id: Uuid) -> Result<Vec<Entry>> {
        let mut out: Vec<Entry> = self
            .working
            .entries
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sequence_number);
        Ok(out)
    }

    async fn find_transfer_by_reference(&mut self, ledger: LedgerId, reference: &str) -> Result<Option<Transfer>> {
        Ok(self
            .working
            .transfers
            .values()
            .find(|t| t.ledger_id == ledger && t.reference == reference)
            .cloned())
    }

    async fn check_idempotency_key(&mut self, ledger: LedgerId, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.working.idempotency.get(&(ledger, key.to_string())).cloned())
    }

    async fn save_idempotency_key(&mut self, record: &IdempotencyRecord) -> Result<()> {
        self.working
            .idempotency
            .insert((record.ledger_id, record.key.clone()), record.clone());
        Ok(())
    }

    async fn append_outbox(&mut self, entry: &OutboxEntry) -> Result<()> {
        self.working.outbox.push(entry.clone());
        Ok(())
    }

    async fn sum_entries_since(
        &mut self,
        account_id: Uuid,
        entry_type: Option<EntryType>,
        category: Option<&str>,
        since: Timestamp,
    ) -> Result<i64> {
        let transfers = &self.working.transfers;
        let total = self
            .working
            .entries
            .iter()
            .filter(|e| e.account_id == account_id && e.created_at >= since)
            .filter(|e| match entry_type {
                Some(t) => e.entry_type == t,
                None => true,
            })
            .filter(|e| match category {
                None => true,
                Some(cat) => transfers
                    .get(&e.transfer_id)
                    .and_then(|t| t.metadata.get("category"))
                    .and_then(|v| v.as_str())
                    == Some(cat),
            })
            .map(|e| e.amount)
            .sum();
        Ok(total)
    }

    async fn get_limits(&mut self, account_id: Uuid) -> Result<Vec<AccountLimit>> {
        Ok(self
            .working
            .limits
            .get(&account_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|l| l.enabled)
            .collect())
    }

    async fn delete_velocity_log_older_than(&mut self, cutoff: Timestamp, batch_size: i64) -> Result<u64> {
        let mut removed = 0u64;
        self.working.entries.retain(|e| {
            if e.created_at < cutoff && removed < batch_size as u64 {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn select_expired_inflight_holds(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Transfer>> {
        use ledger_core::TransferStatus;
        let mut expired: Vec<Transfer> = self
            .working
            .transfers
            .values()
            .filter(|t| t.is_hold && t.status == TransferStatus::Inflight)
            .filter(|t| t.hold_expires_at.map(|exp| exp <= now).unwrap_or(false))
            .cloned()
            .collect();
        expired.sort_by_key(|t| t.hold_expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn list_holds_for_account(&mut self, account_id: Uuid, active_only: bool) -> Result<Vec<Transfer>> {
        use ledger_core::TransferStatus;
        let mut holds: Vec<Transfer> = self
            .working
            .transfers
            .values()
            .filter(|t| t.is_hold)
            .filter(|t| t.source_account_id == Some(account_id) || t.destination_account_id == Some(account_id))
            .filter(|t| !active_only || t.status == TransferStatus::Inflight)
            .cloned()
            .collect();
        holds.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(holds)
    }

    async fn append_status_log(&mut self, entry: &EntityStatusLogEntry) -> Result<()> {
        self.working.status_log.push(entry.clone());
        Ok(())
    }

    async fn select_accounts_due_for_auto_unfreeze(&mut self, now: Timestamp, limit: i64) -> Result<Vec<Account>> {
        use ledger_core::AccountStatus;
        let mut due: Vec<Account> = self
            .working
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Frozen)
            .filter(|a| {
                a.status_meta
                    .as_ref()
                    .and_then(|m| m.auto_unfreeze_at)
                    .map(|at| at <= now)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| a.status_meta.as_ref().and_then(|m| m.auto_unfreeze_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn db_now(&mut self) -> Result<Timestamp> {
        Ok(self.now)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut db = self.store.lock().await;
        *db = std::mem::take(&mut self.working);
        for id in self.held_locks.drain(..) {
            db.locked.remove(&id);
        }
        self.committed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::{AccountStatus, Currency, HolderType};

    fn sample_account() -> Account {
        Account {
            id: Uuid::new_v4(),
            ledger_id: LedgerId(Uuid::new_v4()),
            holder_id: Some("alice".to_string()),
            system_identifier: None,
            is_system: false,
            holder_type: HolderType::Individual,
            currency: Currency::new("USD").unwrap(),
            status: AccountStatus::Active,
            allow_overdraft: false,
            overdraft_limit: 0,
            balance: 500,
            credit_balance: 500,
            debit_balance: 0,
            pending_debit: 0,
            pending_credit: 0,
            version: 1,
            checksum: "x".to_string(),
            status_meta: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rollback_on_drop_discards_writes() {
        let storage = FakeStorage::new(Utc::now());
        let account = sample_account();
        storage.seed_account(account.clone()).await;

        {
            let mut tx = storage.begin().await.unwrap();
            let mut a = tx
                .lock_account_by_id(account.id, LockMode::Wait)
                .await
                .unwrap()
                .unwrap();
            a.balance = 999;
            a.version += 1;
            assert!(tx.update_account_conditional(&a, account.version).await.unwrap());
            // tx dropped here without commit
        }

        assert_eq!(storage.account(account.id).await.unwrap().balance, 500);
    }

    #[tokio::test]
    async fn commit_persists_writes() {
        let storage = FakeStorage::new(Utc::now());
        let account = sample_account();
        storage.seed_account(account.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let mut a = tx
            .lock_account_by_id(account.id, LockMode::Wait)
            .await
            .unwrap()
            .unwrap();
        a.balance = 999;
        a.version += 1;
        assert!(tx.update_account_conditional(&a, account.version).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(storage.account(account.id).await.unwrap().balance, 999);
    }

    #[tokio::test]
    async fn conditional_update_rejects_version_drift() {
        let storage = FakeStorage::new(Utc::now());
        let account = sample_account();
        storage.seed_account(account.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let mut stale = account.clone();
        stale.balance = 1;
        let ok = tx.update_account_conditional(&stale, account.version + 5).await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn nowait_lock_fails_while_another_transaction_holds_it() {
        let storage = FakeStorage::new(Utc::now());
        let account = sample_account();
        storage.seed_account(account.clone()).await;

        let mut tx1 = storage.begin().await.unwrap();
        tx1.lock_account_by_id(account.id, LockMode::Wait).await.unwrap();

        let mut tx2 = storage.begin().await.unwrap();
        let result = tx2.lock_account_by_id(account.id, LockMode::NoWait).await;
        assert!(result.is_err());
    }
}
