//! Hold Manager (spec §4.3): two-phase reservations. A hold debits the
//! source's `pending_debit` without moving `balance`; committing posts the
//! real entries for (at most) the held amount; voiding or expiring releases
//! the reservation with no balance effect.

use chrono::{DateTime, Utc};
use serde_json::Map;
use uuid::Uuid;

use ledger_core::{
    outbox::topics, Account, AccountRef, EntityStatusLogEntry, EntityType, FxFields,
    IdempotencyCheck, LedgerContext, LedgerError, LedgerId, LockMode, Result, Transfer,
    TransferStateMachine, TransferStatus, TransferType,
};
use ledger_storage::{resource_busy, LedgerTx, Storage};

use crate::{idempotency, outbox, poster, resolver};

/// One destination leg of a multi-destination hold.
#[derive(Clone, Debug)]
pub struct HoldDestination {
    pub holder: String,
    pub amount: i64,
}

/// Reserves `amount` against `holder`'s available balance without posting a
/// real entry yet (spec §4.3 T1 "create"). `expires_at` is mandatory — an
/// expiry sweeper is the only thing that reaps abandoned holds. Like every
/// hold-create operation, a replay of `idempotency_key` returns the
/// previously cached hold instead of double-reserving `pending_debit`
/// (spec §4.3, "all hold-create operations accept an idempotency key").
#[allow(clippy::too_many_arguments)]
pub async fn create_hold(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    holder: &str,
    amount: i64,
    reference: &str,
    idempotency_key: Option<&str>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Transfer> {
    if let IdempotencyCheck::AlreadyProcessed(cached) =
        idempotency::check_key(tx, ledger, idempotency_key).await?
    {
        return from_cached(cached);
    }

    if amount <= 0 {
        return Err(LedgerError::InvalidArgument("hold amount must be positive".to_string()));
    }
    if expires_at <= now {
        return Err(LedgerError::InvalidArgument("hold expires_at must be in the future".to_string()));
    }

    let mut source = resolver::lock_for_update(ctx, tx, ledger, &AccountRef::Holder(holder.to_string()), true).await?;
    let prospective_available = source.available() - amount;
    source.check_available(prospective_available)?;

    source.pending_debit += amount;
    source.version += 1;
    source.checksum = recompute_checksum(ctx, &source);
    let expected_version = source.version - 1;
    if !tx.update_account_conditional(&source, expected_version).await? {
        return Err(resource_busy("holds: create_hold account version drift"));
    }

    let hold = Transfer {
        id: Uuid::new_v4(),
        ledger_id: ledger,
        transfer_type: TransferType::Transfer,
        status: TransferStatus::Inflight,
        reference: reference.to_string(),
        amount,
        currency: source.currency.clone(),
        description: None,
        source_account_id: Some(source.id),
        destination_account_id: None,
        correlation_id: None,
        metadata: serde_json::Value::Object(Map::new()),
        is_hold: true,
        hold_expires_at: Some(expires_at),
        parent_id: None,
        is_reversal: false,
        committed_amount: None,
        refunded_amount: 0,
        effective_date: now.date_naive(),
        posted_at: None,
        created_at: now,
    };
    tx.insert_transfer(&hold).await?;

    outbox::publish(
        tx, topics::HOLD_CREATED,
        serde_json::json!({"hold_id": hold.id, "account_id": source.id, "amount": amount}),
        now,
    )
    .await?;

    save_if_keyed(tx, ledger, idempotency_key, reference, &hold, ctx.options.advanced.idempotency_ttl_ms, now).await?;

    Ok(hold)
}

/// A hold against one source with several destinations, settled atomically
/// at commit time (spec §4.3, "multi-destination hold"). Replaying the same
/// `idempotency_key` returns the cached hold rather than reserving twice —
/// the check happens inside `create_hold` before any locking, so a replay
/// never reaches the metadata/`update_transfer` step below.
#[allow(clippy::too_many_arguments)]
pub async fn create_multi_destination_hold(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    holder: &str,
    destinations: &[HoldDestination],
    reference: &str,
    idempotency_key: Option<&str>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Transfer> {
    let total: i64 = destinations.iter().map(|d| d.amount).sum();
    let mut hold = create_hold(ctx, tx, ledger, holder, total, reference, idempotency_key, expires_at, now).await?;
    if hold.metadata.get("destinations").is_some() {
        // Replayed from the idempotency cache — already carries its metadata.
        return Ok(hold);
    }
    let mut metadata = Map::new();
    metadata.insert(
        "destinations".to_string(),
        serde_json::json!(destinations
            .iter()
            .map(|d| serde_json::json!({"holder": d.holder, "amount": d.amount}))
            .collect::<Vec<_>>()),
    );
    hold.metadata = serde_json::Value::Object(metadata);
    tx.update_transfer(&hold).await?;
    if idempotency_key.is_some() {
        // `create_hold` already cached the pre-metadata hold; overwrite with
        // the final version so a replay sees destinations too.
        save_if_keyed(tx, ledger, idempotency_key, reference, &hold, ctx.options.advanced.idempotency_ttl_ms, now).await?;
    }
    Ok(hold)
}

/// Settles an inflight hold for `amount` (defaults to the full held amount,
/// spec T4 "committed_amount <= amount"), posting the real entries and
/// releasing the reservation.
pub async fn commit_hold(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    hold_id: Uuid,
    amount: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Transfer> {
    let mut hold = load_inflight_hold(tx, hold_id).await?;
    let commit_amount = amount.unwrap_or(hold.amount);
    hold.check_committed_amount(commit_amount)?;
    if commit_amount < 0 {
        return Err(LedgerError::InvalidArgument("committed amount must be >= 0".to_string()));
    }

    let source_id = hold
        .source_account_id
        .ok_or_else(|| LedgerError::Internal("hold has no source_account_id".to_string()))?;
    let mut source = tx
        .lock_account_by_id(source_id, ctx.options.advanced.lock_mode)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {source_id}")))?;

    release_pending(ctx, tx, &mut source, hold.amount).await?;

    if commit_amount > 0 {
        let destinations = destinations_of(&hold);
        if destinations.is_empty() {
            let destination_system = ctx.options.system_accounts.world().to_string();
            let dest = resolver::lock_for_update(ctx, tx, ledger, &AccountRef::System(destination_system), false).await?;
            post_settlement_pair(ctx, tx, ledger, &source, &dest, hold.id, commit_amount, now).await?;
        } else {
            let mut remaining = commit_amount;
            for (i, d) in destinations.iter().enumerate() {
                let share = if i + 1 == destinations.len() { remaining } else { d.amount.min(remaining) };
                remaining -= share;
                if share <= 0 {
                    continue;
                }
                let dest = resolver::lock_for_update(ctx, tx, ledger, &AccountRef::Holder(d.holder.clone()), true).await?;
                poster::post_entry(
                    ctx, tx, ledger, &dest, hold.id, ledger_core::EntryType::Credit, share,
                    now.date_naive(), FxFields::default(), now,
                )
                .await?;
            }
        }
    }

    let previous_status = hold.status;
    hold.status = TransferStateMachine::transition(hold.status, TransferStatus::Posted)?;
    hold.committed_amount = Some(commit_amount);
    hold.posted_at = Some(now);
    tx.update_transfer(&hold).await?;
    append_transition(tx, EntityType::Transfer, hold.id, previous_status, hold.status, None, now).await?;

    outbox::publish(
        tx, topics::HOLD_COMMITTED,
        serde_json::json!({"hold_id": hold.id, "account_id": source_id, "committed_amount": commit_amount}),
        now,
    )
    .await?;

    Ok(hold)
}

/// Releases an inflight hold with no settlement (spec T1 "void").
pub async fn void_hold(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    hold_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Transfer> {
    let mut hold = load_inflight_hold(tx, hold_id).await?;
    let source_id = hold
        .source_account_id
        .ok_or_else(|| LedgerError::Internal("hold has no source_account_id".to_string()))?;
    let mut source = tx
        .lock_account_by_id(source_id, ctx.options.advanced.lock_mode)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {source_id}")))?;

    release_pending(ctx, tx, &mut source, hold.amount).await?;

    let previous_status = hold.status;
    hold.status = TransferStateMachine::transition(hold.status, TransferStatus::Voided)?;
    tx.update_transfer(&hold).await?;
    append_transition(tx, EntityType::Transfer, hold.id, previous_status, hold.status, reason.clone(), now).await?;

    outbox::publish(
        tx, topics::HOLD_VOIDED,
        serde_json::json!({"hold_id": hold.id, "account_id": source_id, "reason": reason}),
        now,
    )
    .await?;

    Ok(hold)
}

/// Expiry Sweeper entry point (spec §4.3 T1 "expire"). Claims a batch of
/// expired-and-inflight holds with `FOR UPDATE SKIP LOCKED` so concurrent
/// sweeper instances never double-expire the same hold, then expires each in
/// its own transaction — one hold's failure does not block the rest (spec §7,
/// log-and-continue auxiliary path).
pub async fn expire_holds(ctx: &LedgerContext, storage: &dyn Storage, batch_size: i64, now: DateTime<Utc>) -> Result<u64> {
    let mut claim_tx = storage.begin().await?;
    let due = claim_tx.select_expired_inflight_holds(now, batch_size).await?;
    claim_tx.commit().await?;

    let mut expired = 0u64;
    for hold in due {
        let mut tx = match storage.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(hold_id = %hold.id, error = %e, "sweeper: failed to open transaction");
                continue;
            }
        };
        match expire_one(ctx, tx.as_mut(), hold.id, now).await {
            Ok(()) => match tx.commit().await {
                Ok(()) => expired += 1,
                Err(e) => tracing::warn!(hold_id = %hold.id, error = %e, "sweeper: commit failed"),
            },
            Err(e) => {
                // auxiliary logging path (spec §7): this hold is skipped, the
                // sweeper's next pass will retry it.
                tracing::warn!(hold_id = %hold.id, error = %e, "sweeper: failed to expire hold");
            }
        }
    }
    Ok(expired)
}

async fn expire_one(ctx: &LedgerContext, tx: &mut dyn LedgerTx, hold_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let mut hold = match tx.lock_transfer(hold_id, ctx.options.advanced.lock_mode).await? {
        Some(h) if h.status == TransferStatus::Inflight => h,
        _ => return Ok(()),
    };

    let source_id = hold
        .source_account_id
        .ok_or_else(|| LedgerError::Internal("hold has no source_account_id".to_string()))?;
    let mut source = tx
        .lock_account_by_id(source_id, ctx.options.advanced.lock_mode)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {source_id}")))?;

    release_pending(ctx, tx, &mut source, hold.amount).await?;

    let previous_status = hold.status;
    hold.status = TransferStateMachine::transition(hold.status, TransferStatus::Expired)?;
    tx.update_transfer(&hold).await?;
    append_transition(tx, EntityType::Transfer, hold.id, previous_status, hold.status, None, now).await?;

    outbox::publish(
        tx, topics::HOLD_EXPIRED,
        serde_json::json!({"hold_id": hold.id, "account_id": source_id}),
        now,
    )
    .await
}

pub async fn get_hold(tx: &mut dyn LedgerTx, hold_id: Uuid) -> Result<Transfer> {
    tx.get_transfer(hold_id)
        .await?
        .filter(|t| t.is_hold)
        .ok_or_else(|| LedgerError::NotFound(format!("hold {hold_id}")))
}

pub async fn list_active_holds(tx: &mut dyn LedgerTx, account_id: Uuid) -> Result<Vec<Transfer>> {
    tx.list_holds_for_account(account_id, true).await
}

pub async fn list_all_holds(tx: &mut dyn LedgerTx, account_id: Uuid) -> Result<Vec<Transfer>> {
    tx.list_holds_for_account(account_id, false).await
}

async fn load_inflight_hold(tx: &mut dyn LedgerTx, hold_id: Uuid) -> Result<Transfer> {
    let hold = tx
        .lock_transfer(hold_id, LockMode::Wait)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("hold {hold_id}")))?;
    if !hold.is_hold {
        return Err(LedgerError::InvalidArgument(format!("transfer {hold_id} is not a hold")));
    }
    if hold.status != TransferStatus::Inflight {
        return Err(LedgerError::HoldExpired(hold_id.to_string()));
    }
    Ok(hold)
}

fn destinations_of(hold: &Transfer) -> Vec<HoldDestination> {
    hold.metadata
        .get("destinations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|d| {
                    let holder = d.get("holder")?.as_str()?.to_string();
                    let amount = d.get("amount")?.as_i64()?;
                    Some(HoldDestination { holder, amount })
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn release_pending(ctx: &LedgerContext, tx: &mut dyn LedgerTx, source: &mut Account, amount: i64) -> Result<()> {
    let expected_version = source.version;
    source.pending_debit -= amount;
    source.version += 1;
    source.checksum = recompute_checksum(ctx, source);
    if !tx.update_account_conditional(source, expected_version).await? {
        return Err(resource_busy("holds: release_pending account version drift"));
    }
    Ok(())
}

async fn post_settlement_pair(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    source: &Account,
    dest: &Account,
    hold_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    poster::post_entry(ctx, tx, ledger, source, hold_id, ledger_core::EntryType::Debit, amount, now.date_naive(), FxFields::default(), now).await?;
    poster::post_entry(ctx, tx, ledger, dest, hold_id, ledger_core::EntryType::Credit, amount, now.date_naive(), FxFields::default(), now).await?;
    Ok(())
}

fn from_cached(cached: serde_json::Value) -> Result<Transfer> {
    serde_json::from_value(cached).map_err(|e| LedgerError::Serialization(e.to_string()))
}

async fn save_if_keyed(
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    key: Option<&str>,
    reference: &str,
    hold: &Transfer,
    ttl_ms: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(key) = key else { return Ok(()) };
    let cached = serde_json::to_value(hold).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    idempotency::save_key(tx, ledger, key, reference, cached, ttl_ms, now).await
}

fn recompute_checksum(ctx: &LedgerContext, account: &Account) -> String {
    let secret = ctx.options.advanced.hmac_secret.as_deref();
    ledger_crypto::checksum::compute_checksum(
        secret, account.balance, account.credit_balance, account.debit_balance,
        account.pending_debit, account.pending_credit, account.version,
    )
}

#[allow(clippy::too_many_arguments)]
async fn append_transition(
    tx: &mut dyn LedgerTx,
    entity_type: EntityType,
    entity_id: Uuid,
    previous: TransferStatus,
    current: TransferStatus,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    tx.append_status_log(&EntityStatusLogEntry {
        id: Uuid::new_v4(),
        entity_type,
        entity_id,
        previous_status: format!("{previous:?}").to_lowercase(),
        status: format!("{current:?}").to_lowercase(),
        reason,
        at: now,
    })
    .await
}
