//! Transaction Manager (spec §4.2): orchestrates credit/debit/transfer/
//! multi_transfer/refund. Drives the resolver, poster, velocity limiter,
//! idempotency layer, and outbox inside one backing-store transaction per
//! call.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use ledger_core::constants::MAX_EXCHANGE_RATE;
use ledger_core::types::apply_exchange_rate;
use ledger_core::{
    outbox::topics, Account, AccountRef, Currency, EntryType, FxFields, IdempotencyCheck,
    LedgerContext, LedgerError, LedgerId, Result, Transfer, TransferStateMachine, TransferStatus,
    TransferType, EntityStatusLogEntry, EntityType,
};
use ledger_storage::{LedgerTx, Storage};

use crate::{idempotency, outbox, poster, resolver, velocity};

const DEST_AMOUNT_KEY: &str = "destAmount";
const REQUESTED_AMOUNT_KEY: &str = "requestedAmount";
const CROSS_CURRENCY_KEY: &str = "crossCurrency";
const EXCHANGE_RATE_KEY: &str = "exchangeRate";
const CATEGORY_KEY: &str = "category";

#[derive(Clone, Debug)]
pub struct CreditRequest {
    pub ledger: LedgerId,
    pub holder: String,
    pub amount: i64,
    pub reference: String,
    pub category: Option<String>,
    pub source_system: Option<String>,
    pub idempotency_key: Option<String>,
    pub effective_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default)]
pub struct DebitRequest {
    pub ledger: LedgerId,
    pub holder: String,
    pub amount: i64,
    pub reference: String,
    pub category: Option<String>,
    pub destination_system: Option<String>,
    pub idempotency_key: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub balancing: bool,
    pub force: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TransferRequest {
    pub ledger: LedgerId,
    pub src_holder: String,
    pub dst_holder: String,
    pub amount: i64,
    pub reference: String,
    pub exchange_rate: Option<i64>,
    pub idempotency_key: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub balancing: bool,
    pub force: bool,
}

#[derive(Clone, Debug)]
pub struct Destination {
    pub holder: String,
    pub amount: i64,
}

#[derive(Clone, Debug)]
pub struct MultiTransferRequest {
    pub ledger: LedgerId,
    pub src_holder: String,
    pub amount: i64,
    pub destinations: Vec<Destination>,
    pub reference: String,
    pub idempotency_key: Option<String>,
    pub effective_date: Option<NaiveDate>,
}

fn validate_amount(amount: i64, max: i64) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidArgument("amount must be positive".to_string()));
    }
    if amount > max {
        return Err(LedgerError::InvalidArgument(format!(
            "amount {amount} exceeds max_transaction_amount {max}"
        )));
    }
    Ok(())
}

/// `round(delta * other / whole)`, used to prorate the counterpart-currency
/// leg of a partial refund by the same fraction as the refunded principal.
fn prorate(delta: i64, whole: i64, other: i64) -> Result<i64> {
    if whole == 0 {
        return Ok(0);
    }
    let delta = i128::from(delta);
    let whole = i128::from(whole);
    let other = i128::from(other);
    let numerator = delta.checked_mul(other).ok_or_else(|| {
        LedgerError::InvalidArgument("refund amount overflow during proration".to_string())
    })?;
    let rounded = (numerator + whole / 2) / whole;
    i64::try_from(rounded).map_err(|_| LedgerError::Internal("prorated refund amount out of range".to_string()))
}

fn with_category(category: &Option<String>) -> Map<String, Value> {
    let mut m = Map::new();
    if let Some(cat) = category {
        m.insert(CATEGORY_KEY.to_string(), Value::String(cat.clone()));
    }
    m
}

/// Drives the five orchestrated money-movement operations (spec §4.2).
pub struct TransactionManager {
    storage: Arc<dyn Storage>,
    ctx: LedgerContext,
}

impl TransactionManager {
    pub fn new(storage: Arc<dyn Storage>, ctx: LedgerContext) -> Self {
        Self { storage, ctx }
    }

    pub async fn credit(&self, req: CreditRequest) -> Result<Transfer> {
        validate_amount(req.amount, self.ctx.options.advanced.max_transaction_amount)?;
        let mut tx = self.storage.begin().await?;
        let transfer = self.credit_inner(tx.as_mut(), &req).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn credit_inner(&self, tx: &mut dyn LedgerTx, req: &CreditRequest) -> Result<Transfer> {
        if let IdempotencyCheck::AlreadyProcessed(cached) =
            idempotency::check_key(tx, req.ledger, req.idempotency_key.as_deref()).await?
        {
            return from_cached(cached);
        }

        let now = tx.db_now().await?;
        let effective_date = req.effective_date.unwrap_or_else(|| now.date_naive());
        let source_system = req
            .source_system
            .clone()
            .unwrap_or_else(|| self.ctx.options.system_accounts.world().to_string());

        let dest_account =
            resolver::lock_for_update(&self.ctx, tx, req.ledger, &AccountRef::Holder(req.holder.clone()), true)
                .await?;
        let source_account =
            resolver::lock_for_update(&self.ctx, tx, req.ledger, &AccountRef::System(source_system), false).await?;

        velocity::enforce_limits(tx, dest_account.id, Some(EntryType::Credit), req.category.as_deref(), req.amount, now)
            .await?;

        let mut metadata = with_category(&req.category);
        metadata.insert(DEST_AMOUNT_KEY.to_string(), Value::from(req.amount));

        let transfer = Transfer {
            id: Uuid::new_v4(),
            ledger_id: req.ledger,
            transfer_type: TransferType::Credit,
            status: TransferStatus::Posted,
            reference: req.reference.clone(),
            amount: req.amount,
            currency: dest_account.currency.clone(),
            description: None,
            source_account_id: Some(source_account.id),
            destination_account_id: Some(dest_account.id),
            correlation_id: None,
            metadata: Value::Object(metadata),
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

        poster::post_entry(
            &self.ctx, tx, req.ledger, &source_account, transfer.id, EntryType::Debit, req.amount,
            effective_date, FxFields::default(), now,
        )
        .await?;
        poster::post_entry(
            &self.ctx, tx, req.ledger, &dest_account, transfer.id, EntryType::Credit, req.amount,
            effective_date, FxFields::default(), now,
        )
        .await?;

        outbox::publish(
            tx, topics::ACCOUNT_CREDITED,
            serde_json::json!({"transfer_id": transfer.id, "account_id": dest_account.id, "amount": req.amount}),
            now,
        )
        .await?;

        save_if_keyed(tx, req.ledger, req.idempotency_key.as_deref(), &req.reference, &transfer, self.ctx.options.advanced.idempotency_ttl_ms, now).await?;

        Ok(transfer)
    }

    pub async fn debit(&self, req: DebitRequest) -> Result<Transfer> {
        validate_amount(req.amount, self.ctx.options.advanced.max_transaction_amount)?;
        let mut tx = self.storage.begin().await?;
        let transfer = self.debit_inner(tx.as_mut(), &req).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn debit_inner(&self, tx: &mut dyn LedgerTx, req: &DebitRequest) -> Result<Transfer> {
        if let IdempotencyCheck::AlreadyProcessed(cached) =
            idempotency::check_key(tx, req.ledger, req.idempotency_key.as_deref()).await?
        {
            return from_cached(cached);
        }

        let now = tx.db_now().await?;
        let effective_date = req.effective_date.unwrap_or_else(|| now.date_naive());
        let destination_system = req
            .destination_system
            .clone()
            .unwrap_or_else(|| self.ctx.options.system_accounts.world().to_string());

        let src_account =
            resolver::lock_for_update(&self.ctx, tx, req.ledger, &AccountRef::Holder(req.holder.clone()), true)
                .await?;
        let dest_account = resolver::lock_for_update(
            &self.ctx, tx, req.ledger, &AccountRef::System(destination_system), false,
        )
        .await?;

        let effective_amount = resolve_effective_amount(&src_account, req.amount, req.balancing, req.force)?;

        velocity::enforce_limits(
            tx, src_account.id, Some(EntryType::Debit), req.category.as_deref(), effective_amount, now,
        )
        .await?;

        let mut metadata = with_category(&req.category);
        metadata.insert(DEST_AMOUNT_KEY.to_string(), Value::from(effective_amount));
        if effective_amount != req.amount {
            metadata.insert(REQUESTED_AMOUNT_KEY.to_string(), Value::from(req.amount));
        }

        let transfer = Transfer {
            id: Uuid::new_v4(),
            ledger_id: req.ledger,
            transfer_type: TransferType::Debit,
            status: TransferStatus::Posted,
            reference: req.reference.clone(),
            amount: effective_amount,
            currency: src_account.currency.clone(),
            description: None,
            source_account_id: Some(src_account.id),
            destination_account_id: Some(dest_account.id),
            correlation_id: None,
            metadata: Value::Object(metadata),
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

        if effective_amount > 0 {
            poster::post_entry(
                &self.ctx, tx, req.ledger, &src_account, transfer.id, EntryType::Debit, effective_amount,
                effective_date, FxFields::default(), now,
            )
            .await?;
            poster::post_entry(
                &self.ctx, tx, req.ledger, &dest_account, transfer.id, EntryType::Credit, effective_amount,
                effective_date, FxFields::default(), now,
            )
            .await?;
        }

        outbox::publish(
            tx, topics::ACCOUNT_DEBITED,
            serde_json::json!({"transfer_id": transfer.id, "account_id": src_account.id, "amount": effective_amount}),
            now,
        )
        .await?;

        save_if_keyed(tx, req.ledger, req.idempotency_key.as_deref(), &req.reference, &transfer, self.ctx.options.advanced.idempotency_ttl_ms, now).await?;

        Ok(transfer)
    }

    pub async fn transfer(&self, req: TransferRequest) -> Result<Transfer> {
        validate_amount(req.amount, self.ctx.options.advanced.max_transaction_amount)?;
        let mut tx = self.storage.begin().await?;
        let transfer = self.transfer_inner(tx.as_mut(), &req).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn transfer_inner(&self, tx: &mut dyn LedgerTx, req: &TransferRequest) -> Result<Transfer> {
        if let IdempotencyCheck::AlreadyProcessed(cached) =
            idempotency::check_key(tx, req.ledger, req.idempotency_key.as_deref()).await?
        {
            return from_cached(cached);
        }

        let now = tx.db_now().await?;
        let effective_date = req.effective_date.unwrap_or_else(|| now.date_naive());

        let targets = [
            AccountRef::Holder(req.src_holder.clone()),
            AccountRef::Holder(req.dst_holder.clone()),
        ];
        let locked = resolver::resolve_and_lock_in_order(&self.ctx, tx, req.ledger, &targets, true).await?;
        let src_account = locked
            .iter()
            .find(|a| a.holder_id.as_deref() == Some(req.src_holder.as_str()))
            .cloned()
            .expect("resolver returns one account per requested target");
        let dst_account = locked
            .iter()
            .find(|a| a.holder_id.as_deref() == Some(req.dst_holder.as_str()))
            .cloned()
            .expect("resolver returns one account per requested target");

        let cross_currency = src_account.currency != dst_account.currency;
        let rate = if cross_currency {
            let rate = match req.exchange_rate {
                Some(r) => r,
                None => self
                    .ctx
                    .fx_resolver
                    .resolve(&src_account.currency, &dst_account.currency)?
                    .ok_or_else(|| LedgerError::InvalidArgument("no exchange rate available for currency pair".to_string()))?,
            };
            if rate <= 0 || rate > MAX_EXCHANGE_RATE {
                return Err(LedgerError::InvalidArgument(format!("exchange rate {rate} out of bounds")));
            }
            Some(rate)
        } else {
            None
        };

        let src_effective = resolve_effective_amount(&src_account, req.amount, req.balancing, req.force)?;
        let dst_amount = match rate {
            Some(r) => {
                let converted = apply_exchange_rate(src_effective, r)
                    .ok_or_else(|| LedgerError::InvalidArgument("exchange rate overflow".to_string()))?;
                if converted <= 0 && src_effective > 0 {
                    return Err(LedgerError::InvalidArgument("converted destination amount must be > 0".to_string()));
                }
                converted
            }
            None => src_effective,
        };

        velocity::enforce_limits(tx, src_account.id, Some(EntryType::Debit), None, src_effective, now).await?;
        velocity::enforce_limits(tx, dst_account.id, Some(EntryType::Credit), None, dst_amount, now).await?;

        let mut metadata = Map::new();
        metadata.insert(DEST_AMOUNT_KEY.to_string(), Value::from(dst_amount));
        if src_effective != req.amount {
            metadata.insert(REQUESTED_AMOUNT_KEY.to_string(), Value::from(req.amount));
        }
        if cross_currency {
            metadata.insert(CROSS_CURRENCY_KEY.to_string(), Value::Bool(true));
            metadata.insert(EXCHANGE_RATE_KEY.to_string(), Value::from(rate.unwrap()));
        }

        let transfer = Transfer {
            id: Uuid::new_v4(),
            ledger_id: req.ledger,
            transfer_type: TransferType::Transfer,
            status: TransferStatus::Posted,
            reference: req.reference.clone(),
            amount: src_effective,
            currency: src_account.currency.clone(),
            description: None,
            source_account_id: Some(src_account.id),
            destination_account_id: Some(dst_account.id),
            correlation_id: None,
            metadata: Value::Object(metadata),
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

        if src_effective > 0 {
            poster::post_entry(
                &self.ctx, tx, req.ledger, &src_account, transfer.id, EntryType::Debit, src_effective,
                effective_date, FxFields::default(), now,
            )
            .await?;
            let dst_fx = if cross_currency {
                FxFields { source_currency: Some(src_account.currency.clone()), exchange_rate: rate }
            } else {
                FxFields::default()
            };
            poster::post_entry(
                &self.ctx, tx, req.ledger, &dst_account, transfer.id, EntryType::Credit, dst_amount,
                effective_date, dst_fx, now,
            )
            .await?;
        }

        outbox::publish(tx, topics::ACCOUNT_DEBITED, serde_json::json!({"transfer_id": transfer.id, "account_id": src_account.id, "amount": src_effective}), now).await?;
        outbox::publish(tx, topics::ACCOUNT_CREDITED, serde_json::json!({"transfer_id": transfer.id, "account_id": dst_account.id, "amount": dst_amount}), now).await?;

        save_if_keyed(tx, req.ledger, req.idempotency_key.as_deref(), &req.reference, &transfer, self.ctx.options.advanced.idempotency_ttl_ms, now).await?;

        Ok(transfer)
    }

    pub async fn multi_transfer(&self, req: MultiTransferRequest) -> Result<Transfer> {
        validate_amount(req.amount, self.ctx.options.advanced.max_transaction_amount)?;
        if req.destinations.is_empty() {
            return Err(LedgerError::InvalidArgument("multi_transfer requires at least one destination".to_string()));
        }
        let declared: i64 = req.destinations.iter().map(|d| d.amount).sum();
        if declared != req.amount {
            return Err(LedgerError::InvalidArgument(format!(
                "destination amounts sum to {declared}, expected {}", req.amount
            )));
        }
        let mut tx = self.storage.begin().await?;
        let transfer = self.multi_transfer_inner(tx.as_mut(), &req).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn multi_transfer_inner(&self, tx: &mut dyn LedgerTx, req: &MultiTransferRequest) -> Result<Transfer> {
        if let IdempotencyCheck::AlreadyProcessed(cached) =
            idempotency::check_key(tx, req.ledger, req.idempotency_key.as_deref()).await?
        {
            return from_cached(cached);
        }

        let now = tx.db_now().await?;
        let effective_date = req.effective_date.unwrap_or_else(|| now.date_naive());

        let mut targets = vec![AccountRef::Holder(req.src_holder.clone())];
        targets.extend(req.destinations.iter().map(|d| AccountRef::Holder(d.holder.clone())));
        let locked = resolver::resolve_and_lock_in_order(&self.ctx, tx, req.ledger, &targets, true).await?;
        let src_account = locked
            .iter()
            .find(|a| a.holder_id.as_deref() == Some(req.src_holder.as_str()))
            .cloned()
            .expect("resolver returns one account per requested target");

        let src_effective = resolve_effective_amount(&src_account, req.amount, false, false)?;
        velocity::enforce_limits(tx, src_account.id, Some(EntryType::Debit), None, src_effective, now).await?;

        let mut destinations_meta = Vec::with_capacity(req.destinations.len());
        let mut metadata = Map::new();
        metadata.insert(DEST_AMOUNT_KEY.to_string(), Value::from(req.amount));

        let transfer = Transfer {
            id: Uuid::new_v4(),
            ledger_id: req.ledger,
            transfer_type: TransferType::Transfer,
            status: TransferStatus::Posted,
            reference: req.reference.clone(),
            amount: src_effective,
            currency: src_account.currency.clone(),
            description: None,
            source_account_id: Some(src_account.id),
            destination_account_id: None,
            correlation_id: None,
            metadata: Value::Object(metadata.clone()),
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

        poster::post_entry(
            &self.ctx, tx, req.ledger, &src_account, transfer.id, EntryType::Debit, src_effective,
            effective_date, FxFields::default(), now,
        )
        .await?;

        for dest_req in &req.destinations {
            let dst_account = locked
                .iter()
                .find(|a| a.holder_id.as_deref() == Some(dest_req.holder.as_str()))
                .cloned()
                .expect("resolver returns one account per requested target");
            velocity::enforce_limits(tx, dst_account.id, Some(EntryType::Credit), None, dest_req.amount, now).await?;
            poster::post_entry(
                &self.ctx, tx, req.ledger, &dst_account, transfer.id, EntryType::Credit, dest_req.amount,
                effective_date, FxFields::default(), now,
            )
            .await?;
            destinations_meta.push(serde_json::json!({"holder": dest_req.holder, "amount": dest_req.amount}));
            outbox::publish(tx, topics::ACCOUNT_CREDITED, serde_json::json!({"transfer_id": transfer.id, "account_id": dst_account.id, "amount": dest_req.amount}), now).await?;
        }

        outbox::publish(tx, topics::ACCOUNT_DEBITED, serde_json::json!({"transfer_id": transfer.id, "account_id": src_account.id, "amount": src_effective}), now).await?;

        save_if_keyed(tx, req.ledger, req.idempotency_key.as_deref(), &req.reference, &transfer, self.ctx.options.advanced.idempotency_ttl_ms, now).await?;

        Ok(transfer)
    }

    /// Refunds all or part of a posted transfer (spec §4.2 "Refund").
    pub async fn refund(&self, ledger: LedgerId, transfer_id: Uuid, reason: Option<String>, amount: Option<i64>) -> Result<Transfer> {
        let mut tx = self.storage.begin().await?;
        let transfer = self.refund_inner(tx.as_mut(), ledger, transfer_id, reason, amount).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn refund_inner(
        &self,
        tx: &mut dyn LedgerTx,
        ledger: LedgerId,
        transfer_id: Uuid,
        reason: Option<String>,
        amount: Option<i64>,
    ) -> Result<Transfer> {
        let mut original = tx
            .lock_transfer(transfer_id, self.ctx.options.advanced.lock_mode)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {transfer_id}")))?;

        if original.status != TransferStatus::Posted {
            return Err(LedgerError::Conflict(format!(
                "transfer {transfer_id} is {:?}, not posted", original.status
            )));
        }

        let delta = amount.unwrap_or_else(|| original.refundable_remaining());
        if delta <= 0 || delta > original.refundable_remaining() {
            return Err(LedgerError::InvalidArgument(format!(
                "refund amount {delta} exceeds refundable remainder {}",
                original.refundable_remaining()
            )));
        }

        let cumulative = original.refunded_amount + delta;
        let refund_reference = original.refund_reference(cumulative);

        if let Some(existing) = tx.find_transfer_by_reference(ledger, &refund_reference).await? {
            return Ok(existing);
        }

        let now = tx.db_now().await?;
        let effective_date = now.date_naive();

        let dest_amount_whole = original
            .metadata
            .get(DEST_AMOUNT_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(original.amount);
        let dest_delta = prorate(delta, original.amount, dest_amount_whole)?;

        let source_id = original
            .source_account_id
            .ok_or_else(|| LedgerError::Internal("refundable transfer has no source_account_id".to_string()))?;
        let dest_id = original
            .destination_account_id
            .ok_or_else(|| LedgerError::Internal("refundable transfer has no destination_account_id".to_string()))?;

        let (first_id, second_id) = if source_id <= dest_id { (source_id, dest_id) } else { (dest_id, source_id) };
        let first = lock_by_id(tx, first_id, self.ctx.options.advanced.lock_mode).await?;
        let second = lock_by_id(tx, second_id, self.ctx.options.advanced.lock_mode).await?;
        let (original_source, original_dest) = if first.id == source_id { (first, second) } else { (second, first) };

        let correction = Transfer {
            id: Uuid::new_v4(),
            ledger_id: ledger,
            transfer_type: TransferType::Correction,
            status: TransferStatus::Posted,
            reference: refund_reference,
            amount: delta,
            currency: original.currency.clone(),
            description: reason,
            source_account_id: Some(original_dest.id),
            destination_account_id: Some(original_source.id),
            correlation_id: original.correlation_id,
            metadata: serde_json::json!({ DEST_AMOUNT_KEY: dest_delta }),
            is_hold: false,
            hold_expires_at: None,
            parent_id: Some(original.id),
            is_reversal: true,
            committed_amount: None,
            refunded_amount: 0,
            effective_date,
            posted_at: Some(now),
            created_at: now,
        };
        tx.insert_transfer(&correction).await?;

        // Invert the original sides: money flows dest -> source.
        poster::post_entry(
            &self.ctx, tx, ledger, &original_dest, correction.id, EntryType::Debit, dest_delta,
            effective_date, FxFields::default(), now,
        )
        .await?;
        poster::post_entry(
            &self.ctx, tx, ledger, &original_source, correction.id, EntryType::Credit, delta,
            effective_date, FxFields::default(), now,
        )
        .await?;

        let previous_status = original.status;
        original.refunded_amount = cumulative;
        if cumulative >= original.amount {
            original.status = TransferStateMachine::transition(original.status, TransferStatus::Reversed)?;
        }
        tx.update_transfer(&original).await?;

        if previous_status != original.status {
            tx.append_status_log(&EntityStatusLogEntry {
                id: Uuid::new_v4(),
                entity_type: EntityType::Transfer,
                entity_id: original.id,
                previous_status: format!("{previous_status:?}").to_lowercase(),
                status: format!("{:?}", original.status).to_lowercase(),
                reason: None,
                at: now,
            })
            .await?;
        }

        Ok(correction)
    }
}

fn resolve_effective_amount(account: &Account, requested: i64, balancing: bool, force: bool) -> Result<i64> {
    if force {
        return Ok(requested);
    }
    let prospective_available = account.available() - requested;
    if balancing {
        let avail = account.available().max(0);
        return Ok(requested.min(avail));
    }
    account.check_available(prospective_available)?;
    Ok(requested)
}

async fn lock_by_id(tx: &mut dyn LedgerTx, id: Uuid, mode: ledger_core::LockMode) -> Result<Account> {
    tx.lock_account_by_id(id, mode)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
}

fn from_cached(cached: Value) -> Result<Transfer> {
    serde_json::from_value(cached).map_err(|e| LedgerError::Serialization(e.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn save_if_keyed(
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    key: Option<&str>,
    reference: &str,
    transfer: &Transfer,
    ttl_ms: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(key) = key else { return Ok(()) };
    let cached = serde_json::to_value(transfer).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    idempotency::save_key(tx, ledger, key, reference, cached, ttl_ms, now).await
}
