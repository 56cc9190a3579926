//! Account lifecycle (spec §3 "Lifecycle": "mutated only by posting or
//! explicit freeze/close"). Transitions an account's `AccountStatus`,
//! appending an `EntityStatusLogEntry{entity_type: Account}` the same way
//! `holds.rs` logs transfer status transitions, and — for the one sweeper
//! path — publishing the `ledger-account-auto-unfrozen` outbox topic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ledger_core::{
    outbox::topics, Account, AccountStatus, EntityStatusLogEntry, EntityType, LedgerContext,
    LedgerError, LedgerId, LockMode, Result, StatusChangeMeta,
};
use ledger_storage::{resource_busy, LedgerTx, Storage};

use crate::outbox;

fn require_transition(from: AccountStatus, to: AccountStatus) -> Result<()> {
    let allowed = matches!(
        (from, to),
        (AccountStatus::Active, AccountStatus::Frozen)
            | (AccountStatus::Frozen, AccountStatus::Active)
            | (AccountStatus::Active, AccountStatus::Closed)
            | (AccountStatus::Frozen, AccountStatus::Closed)
    );
    if !allowed {
        return Err(LedgerError::Conflict(format!("cannot transition account from {from:?} to {to:?}")));
    }
    Ok(())
}

async fn transition(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    account_id: Uuid,
    to: AccountStatus,
    reason: Option<String>,
    auto_unfreeze_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Account> {
    let mut account = tx
        .lock_account_by_id(account_id, LockMode::Wait)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
    require_transition(account.status, to)?;

    let previous = account.status;
    let expected_version = account.version;
    account.status = to;
    account.status_meta = Some(StatusChangeMeta { reason: reason.clone(), at: now, auto_unfreeze_at });
    account.version += 1;
    account.checksum = recompute_checksum(ctx.options.advanced.hmac_secret.as_deref(), &account);

    if !tx.update_account_conditional(&account, expected_version).await? {
        return Err(resource_busy("lifecycle: account version drift"));
    }

    tx.append_status_log(&EntityStatusLogEntry {
        id: Uuid::new_v4(),
        entity_type: EntityType::Account,
        entity_id: account_id,
        previous_status: format!("{previous:?}").to_lowercase(),
        status: format!("{to:?}").to_lowercase(),
        reason,
        at: now,
    })
    .await?;

    Ok(account)
}

fn recompute_checksum(secret: Option<&[u8]>, account: &Account) -> String {
    ledger_crypto::checksum::compute_checksum(
        secret, account.balance, account.credit_balance, account.debit_balance,
        account.pending_debit, account.pending_credit, account.version,
    )
}

/// Freezes an active account (spec §3 "explicit freeze"). `auto_unfreeze_at`,
/// if given, is a deadline the sweeper later reaps via
/// [`run_auto_unfreeze_sweep`]; omit it for a freeze that only an explicit
/// [`unfreeze_account`] call can lift.
pub async fn freeze_account(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    account_id: Uuid,
    reason: Option<String>,
    auto_unfreeze_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Account> {
    transition(ctx, tx, account_id, AccountStatus::Frozen, reason, auto_unfreeze_at, now).await
}

/// Lifts an explicit or expired freeze back to `Active`.
pub async fn unfreeze_account(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    account_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Account> {
    transition(ctx, tx, account_id, AccountStatus::Active, reason, None, now).await
}

/// Closes an active or frozen account. Closed is terminal — no transition
/// out of it exists (spec §3 "never destroyed", §9 "closed tagged variant").
pub async fn close_account(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    account_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Account> {
    transition(ctx, tx, account_id, AccountStatus::Closed, reason, None, now).await
}

/// Auto-unfreeze Sweeper entry point: claims frozen accounts whose
/// `status_meta.auto_unfreeze_at` is due, transitions each back to `Active`
/// in its own transaction, and publishes `ledger-account-auto-unfrozen`
/// (spec §6). Mirrors [`crate::holds::expire_holds`]'s claim-then-process
/// shape and its log-and-continue error handling (spec §7).
pub async fn run_auto_unfreeze_sweep(
    ctx: &LedgerContext,
    storage: &dyn Storage,
    batch_size: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut claim_tx = storage.begin().await?;
    let due = claim_tx.select_accounts_due_for_auto_unfreeze(now, batch_size).await?;
    claim_tx.commit().await?;

    let mut unfrozen = 0u64;
    for account in due {
        let mut tx = match storage.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(account_id = %account.id, error = %e, "auto-unfreeze sweeper: failed to open transaction");
                continue;
            }
        };
        match auto_unfreeze_one(ctx, tx.as_mut(), account.id, now).await {
            Ok(()) => match tx.commit().await {
                Ok(()) => unfrozen += 1,
                Err(e) => tracing::warn!(account_id = %account.id, error = %e, "auto-unfreeze sweeper: commit failed"),
            },
            Err(e) => tracing::warn!(account_id = %account.id, error = %e, "auto-unfreeze sweeper: failed to unfreeze account"),
        }
    }
    Ok(unfrozen)
}

async fn auto_unfreeze_one(ctx: &LedgerContext, tx: &mut dyn LedgerTx, account_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let account = tx.lock_account_by_id(account_id, LockMode::Wait).await?;
    let Some(account) = account else { return Ok(()) };
    if account.status != AccountStatus::Frozen {
        return Ok(());
    }
    let due = account
        .status_meta
        .as_ref()
        .and_then(|m| m.auto_unfreeze_at)
        .map(|at| at <= now)
        .unwrap_or(false);
    if !due {
        return Ok(());
    }

    unfreeze_account(ctx, tx, account_id, Some("auto-unfreeze: deadline reached".to_string()), now).await?;

    outbox::publish(tx, topics::ACCOUNT_AUTO_UNFROZEN, serde_json::json!({"account_id": account_id}), now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Currency, HolderType, LedgerOptions, SystemAccounts};
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

    fn account(ledger: LedgerId, status: AccountStatus) -> Account {
        Account {
            id: Uuid::new_v4(),
            ledger_id: ledger,
            holder_id: Some("alice".to_string()),
            system_identifier: None,
            is_system: false,
            holder_type: HolderType::Individual,
            currency: Currency::new("USD").unwrap(),
            status,
            allow_overdraft: false,
            overdraft_limit: 0,
            balance: 500,
            credit_balance: 500,
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
    async fn freeze_then_unfreeze_round_trips_through_active() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let a = account(ledger, AccountStatus::Active);
        storage.seed_account(a.clone()).await;

        let now = Utc::now();
        let mut tx = storage.begin().await.unwrap();
        let frozen = freeze_account(&c, tx.as_mut(), a.id, Some("fraud review".to_string()), None, now).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(frozen.status, AccountStatus::Frozen);
        assert_eq!(frozen.version, 2);

        let mut tx = storage.begin().await.unwrap();
        let unfrozen = unfreeze_account(&c, tx.as_mut(), a.id, Some("review cleared".to_string()), now).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(unfrozen.status, AccountStatus::Active);
        assert_eq!(unfrozen.version, 3);
    }

    #[tokio::test]
    async fn closing_is_terminal() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let a = account(ledger, AccountStatus::Active);
        storage.seed_account(a.clone()).await;

        let now = Utc::now();
        let mut tx = storage.begin().await.unwrap();
        let closed = close_account(&c, tx.as_mut(), a.id, Some("account closed by holder".to_string()), now).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);

        let mut tx = storage.begin().await.unwrap();
        let err = unfreeze_account(&c, tx.as_mut(), a.id, None, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn freezing_an_already_frozen_account_is_a_conflict() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let a = account(ledger, AccountStatus::Frozen);
        storage.seed_account(a.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let err = freeze_account(&c, tx.as_mut(), a.id, None, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn sweeper_auto_unfreezes_due_accounts_and_publishes_topic() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let due = account(ledger, AccountStatus::Active);
        let not_yet = account(ledger, AccountStatus::Active);
        storage.seed_account(due.clone()).await;
        storage.seed_account(not_yet.clone()).await;

        let now = Utc::now();
        let already_due = now - chrono::Duration::minutes(1);
        let in_the_future = now + chrono::Duration::minutes(30);

        let mut tx = storage.begin().await.unwrap();
        freeze_account(&c, tx.as_mut(), due.id, None, Some(already_due), now).await.unwrap();
        freeze_account(&c, tx.as_mut(), not_yet.id, None, Some(in_the_future), now).await.unwrap();
        tx.commit().await.unwrap();

        let unfrozen_count = run_auto_unfreeze_sweep(&c, &storage, 10, now).await.unwrap();
        assert_eq!(unfrozen_count, 1);

        assert_eq!(storage.account(due.id).await.unwrap().status, AccountStatus::Active);
        assert_eq!(storage.account(not_yet.id).await.unwrap().status, AccountStatus::Frozen);

        let published = storage.outbox().await;
        assert!(published.iter().any(|e| e.topic == topics::ACCOUNT_AUTO_UNFROZEN));
    }
}
