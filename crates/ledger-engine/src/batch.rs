//! Batch Engine (spec §4.7): an optional fast path that coalesces many
//! concurrent credit/debit requests into one backing-store transaction.
//! Shaped like the teacher's inbound-message multiplexing loop: a channel
//! feeds a single worker task that buffers items and flushes on a size or
//! time threshold, whichever comes first (`tokio::select!` racing the two).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use ledger_core::{
    outbox::topics, Account, AccountRef, EntryType, FxFields, IdempotencyCheck, LedgerContext,
    LedgerError, LedgerId, Result, Transfer, TransferStatus, TransferType,
};
use ledger_storage::{LedgerTx, Storage};

use crate::{idempotency, outbox, poster, resolver, velocity};

/// One request accepted into a batch. Only single-account credit/debit
/// movements are eligible (spec §4.7, "independent credit/debit requests") —
/// multi-account transfers keep going through [`crate::transaction_manager`].
#[derive(Clone, Debug)]
pub struct BatchRequest {
    pub ledger: LedgerId,
    pub holder: String,
    pub entry_type: EntryType,
    pub amount: i64,
    pub reference: String,
    pub counterparty_system: Option<String>,
    pub idempotency_key: Option<String>,
}

struct BatchItem {
    request: BatchRequest,
    respond_to: oneshot::Sender<Result<Transfer>>,
}

/// Handle callers submit requests through. Cloning is cheap; every clone
/// feeds the same worker task.
#[derive(Clone)]
pub struct BatchEngine {
    sender: mpsc::Sender<BatchItem>,
}

impl BatchEngine {
    /// Spawns the worker task and returns a handle plus its join handle (the
    /// node binary holds the latter only to await clean shutdown).
    pub fn spawn(
        storage: Arc<dyn Storage>,
        ctx: LedgerContext,
        max_batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(max_batch_size * 4);
        let handle = tokio::spawn(run_worker(receiver, storage, ctx, max_batch_size, flush_interval));
        (Self { sender }, handle)
    }

    /// Submits one request and awaits its settled result. Resolves once the
    /// batch containing it commits (or the whole batch rolls back).
    pub async fn submit(&self, request: BatchRequest) -> Result<Transfer> {
        let (respond_to, receiver) = oneshot::channel();
        self.sender
            .send(BatchItem { request, respond_to })
            .await
            .map_err(|_| LedgerError::Internal("batch engine worker has shut down".to_string()))?;
        receiver
            .await
            .map_err(|_| LedgerError::Internal("batch engine dropped the response channel".to_string()))?
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<BatchItem>,
    storage: Arc<dyn Storage>,
    ctx: LedgerContext,
    max_batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer = Vec::with_capacity(max_batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = receiver.recv() => {
                match item {
                    Some(item) => {
                        buffer.push(item);
                        if buffer.len() >= max_batch_size {
                            flush(std::mem::take(&mut buffer), &storage, &ctx).await;
                        }
                    }
                    None => {
                        if !buffer.is_empty() {
                            flush(std::mem::take(&mut buffer), &storage, &ctx).await;
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(std::mem::take(&mut buffer), &storage, &ctx).await;
                }
            }
        }
    }
}

/// Settles one buffered batch. Amount validation and idempotency hits are
/// resolved before any posting and never affect the rest of the batch; a
/// genuine storage-layer failure aborts the whole transaction and every
/// item in it fails alike (spec §4.7).
async fn flush(items: Vec<BatchItem>, storage: &Arc<dyn Storage>, ctx: &LedgerContext) {
    let mut tx = match storage.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            reject_all(items, e);
            return;
        }
    };

    match flush_inner(items, tx.as_mut(), ctx).await {
        Ok(pending) => match tx.commit().await {
            Ok(()) => settle(pending),
            Err(e) => reject_all(into_items(pending), e),
        },
        Err((items, e)) => reject_all(items, e),
    }
}

struct Pending {
    item: BatchItem,
    result: Result<Transfer>,
}

fn into_items(pending: Vec<Pending>) -> Vec<BatchItem> {
    pending.into_iter().map(|p| p.item).collect()
}

fn settle(pending: Vec<Pending>) {
    for p in pending {
        let _ = p.item.respond_to.send(p.result);
    }
}

fn reject_all(items: Vec<BatchItem>, e: LedgerError) {
    for item in items {
        let _ = item.respond_to.send(Err(clone_err(&e)));
    }
}

fn clone_err(e: &LedgerError) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

/// Prepares and posts every item in `items` against one shared working set of
/// account snapshots, returning per-item results on success or the first
/// hard storage error on failure (which aborts the whole batch).
async fn flush_inner(
    items: Vec<BatchItem>,
    tx: &mut dyn LedgerTx,
    ctx: &LedgerContext,
) -> std::result::Result<Vec<Pending>, (Vec<BatchItem>, LedgerError)> {
    let now = match tx.db_now().await {
        Ok(n) => n,
        Err(e) => return Err((items, e)),
    };

    let mut targets: Vec<AccountRef> = Vec::new();
    for item in &items {
        push_unique(&mut targets, AccountRef::Holder(item.request.holder.clone()));
        let system = item
            .request
            .counterparty_system
            .clone()
            .unwrap_or_else(|| ctx.options.system_accounts.world().to_string());
        push_unique(&mut targets, AccountRef::System(system));
    }

    let ledger = items
        .first()
        .map(|i| i.request.ledger)
        .unwrap_or(LedgerId(Uuid::nil()));

    let locked = match resolver::resolve_and_lock_in_order(ctx, tx, ledger, &targets, false).await {
        Ok(v) => v,
        Err(e) => return Err((items, e)),
    };
    let mut working: HashMap<Uuid, Account> = locked.into_iter().map(|a| (a.id, a)).collect();
    let mut by_holder: HashMap<String, Uuid> = HashMap::new();
    let mut by_system: HashMap<String, Uuid> = HashMap::new();
    for a in working.values() {
        if let Some(h) = &a.holder_id {
            by_holder.insert(h.clone(), a.id);
        }
        if let Some(s) = &a.system_identifier {
            by_system.insert(s.clone(), a.id);
        }
    }

    let mut pending = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();
    while let Some(item) = iter.next() {
        let req = item.request.clone();
        let result = process_one(ctx, tx, &mut working, &by_holder, &by_system, &req, now).await;
        match result {
            Ok(transfer) => pending.push(Pending { item, result: Ok(transfer) }),
            Err(e) if is_hard_storage_error(&e) => {
                // A storage-layer failure aborts the whole batch (spec §4.7):
                // every item, processed or not, rejects with the same error.
                let mut remaining: Vec<BatchItem> = pending.into_iter().map(|p| p.item).collect();
                remaining.push(item);
                remaining.extend(iter);
                return Err((remaining, e));
            }
            Err(e) => pending.push(Pending { item, result: Err(e) }),
        }
    }
    Ok(pending)
}

fn is_hard_storage_error(e: &LedgerError) -> bool {
    matches!(e, LedgerError::ResourceBusy(_) | LedgerError::Storage(_) | LedgerError::Internal(_))
}

fn push_unique(targets: &mut Vec<AccountRef>, target: AccountRef) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

async fn process_one(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    working: &mut HashMap<Uuid, Account>,
    by_holder: &HashMap<String, Uuid>,
    by_system: &HashMap<String, Uuid>,
    req: &BatchRequest,
    now: DateTime<Utc>,
) -> Result<Transfer> {
    if req.amount <= 0 || req.amount > ctx.options.advanced.max_transaction_amount {
        return Err(LedgerError::InvalidArgument(format!("amount {} out of bounds", req.amount)));
    }

    if let IdempotencyCheck::AlreadyProcessed(cached) =
        idempotency::check_key(tx, req.ledger, req.idempotency_key.as_deref()).await?
    {
        return serde_json::from_value(cached).map_err(|e| LedgerError::Serialization(e.to_string()));
    }

    let holder_id = *by_holder
        .get(&req.holder)
        .ok_or_else(|| LedgerError::NotFound(format!("account {}", req.holder)))?;
    let system_name = req
        .counterparty_system
        .clone()
        .unwrap_or_else(|| ctx.options.system_accounts.world().to_string());
    let system_id = *by_system
        .get(&system_name)
        .ok_or_else(|| LedgerError::NotFound(format!("account {system_name}")))?;

    let holder_account = working.get(&holder_id).cloned().expect("resolved above");
    let system_account = working.get(&system_id).cloned().expect("resolved above");
    holder_account.require_active()?;

    let (holder_entry_type, system_entry_type) = (req.entry_type, req.entry_type.opposite());
    if req.entry_type == EntryType::Debit {
        let prospective = holder_account.available() - req.amount;
        holder_account.check_available(prospective)?;
    }

    velocity::enforce_limits(tx, holder_id, Some(req.entry_type), None, req.amount, now).await?;

    let effective_date = now.date_naive();
    let transfer = Transfer {
        id: Uuid::new_v4(),
        ledger_id: req.ledger,
        transfer_type: if req.entry_type == EntryType::Credit { TransferType::Credit } else { TransferType::Debit },
        status: TransferStatus::Posted,
        reference: req.reference.clone(),
        amount: req.amount,
        currency: holder_account.currency.clone(),
        description: None,
        source_account_id: Some(if req.entry_type == EntryType::Debit { holder_id } else { system_id }),
        destination_account_id: Some(if req.entry_type == EntryType::Debit { system_id } else { holder_id }),
        correlation_id: None,
        metadata: serde_json::Value::Object(serde_json::Map::new()),
        is_hold: false,
        hold_expires_at: None,
        parent_id: None,
        is_reversal: false,
        committed_amount: None,
        refunded_amount: 0,
        effective_date,
        posted_at: Some(now),
        created_at: now,
    };
    tx.insert_transfer(&transfer).await?;

    let posted_system = poster::post_entry(
        ctx, tx, req.ledger, &system_account, transfer.id, system_entry_type, req.amount,
        effective_date, FxFields::default(), now,
    )
    .await?;
    let posted_holder = poster::post_entry(
        ctx, tx, req.ledger, &holder_account, transfer.id, holder_entry_type, req.amount,
        effective_date, FxFields::default(), now,
    )
    .await?;

    working.insert(system_id, posted_system.account);
    working.insert(holder_id, posted_holder.account);

    let topic = if req.entry_type == EntryType::Credit { topics::ACCOUNT_CREDITED } else { topics::ACCOUNT_DEBITED };
    outbox::publish(tx, topic, serde_json::json!({"transfer_id": transfer.id, "account_id": holder_id, "amount": req.amount}), now).await?;

    if let Some(key) = &req.idempotency_key {
        let cached = serde_json::to_value(&transfer).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        idempotency::save_key(tx, req.ledger, key, &req.reference, cached, ctx.options.advanced.idempotency_ttl_ms, now).await?;
    }

    Ok(transfer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{AccountStatus, Currency, HolderType, LedgerOptions, SystemAccounts};
    use ledger_storage::FakeStorage;

    fn ctx() -> LedgerContext {
        LedgerContext::new(LedgerOptions {
            schema: "public".to_string(),
            currency: Currency::new("USD").unwrap(),
            advanced: ledger_core::AdvancedOptions {
                hmac_secret: Some(b"k".to_vec()),
                ..Default::default()
            },
            system_accounts: SystemAccounts::default(),
        })
    }

    fn account(ledger: LedgerId, is_system: bool, holder: &str, balance: i64) -> Account {
        Account {
            id: Uuid::new_v4(),
            ledger_id: ledger,
            holder_id: if is_system { None } else { Some(holder.to_string()) },
            system_identifier: if is_system { Some(holder.to_string()) } else { None },
            is_system,
            holder_type: if is_system { HolderType::System } else { HolderType::Individual },
            currency: Currency::new("USD").unwrap(),
            status: AccountStatus::Active,
            allow_overdraft: is_system,
            overdraft_limit: if is_system { i64::MAX } else { 0 },
            balance,
            credit_balance: balance.max(0),
            debit_balance: 0,
            pending_debit: 0,
            pending_credit: 0,
            version: 1,
            checksum: String::new(),
            status_meta: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_credits_coalesce_into_one_transaction() {
        let c = ctx();
        let fake = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let world = account(ledger, true, "@World", 0);
        let alice = account(ledger, false, "alice", 0);
        let bob = account(ledger, false, "bob", 0);
        fake.seed_account(world).await;
        fake.seed_account(alice.clone()).await;
        fake.seed_account(bob.clone()).await;
        let storage: Arc<dyn Storage> = Arc::new(fake.clone());

        let (engine, _handle) = BatchEngine::spawn(storage, c, 8, Duration::from_millis(5));

        let a = engine.submit(BatchRequest {
            ledger, holder: "alice".to_string(), entry_type: EntryType::Credit, amount: 100,
            reference: "r1".to_string(), counterparty_system: None, idempotency_key: None,
        });
        let b = engine.submit(BatchRequest {
            ledger, holder: "bob".to_string(), entry_type: EntryType::Credit, amount: 50,
            reference: "r2".to_string(), counterparty_system: None, idempotency_key: None,
        });

        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        assert_eq!(fake.account(alice.id).await.unwrap().balance, 100);
        assert_eq!(fake.account(bob.id).await.unwrap().balance, 50);
    }
}
