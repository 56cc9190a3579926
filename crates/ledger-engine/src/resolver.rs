//! Account Resolver (spec §4.1): locates and locks an account row ahead of
//! a read-modify-write, or returns a read-only snapshot for queries.

use ledger_core::{Account, AccountRef, LedgerContext, LedgerError, LedgerId, LockMode, Result};
use ledger_crypto::checksum::verify_account_checksum;
use ledger_storage::LedgerTx;

/// Locks the account identified by `target` using the context's configured
/// lock mode, verifies its checksum, and optionally requires it be active.
pub async fn lock_for_update(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    target: &AccountRef,
    require_active: bool,
) -> Result<Account> {
    lock_for_update_with_mode(ctx, tx, ledger, target, require_active, ctx.options.advanced.lock_mode).await
}

/// As [`lock_for_update`] but with an explicit lock mode override — used by
/// the batch engine and hold manager, which lock accounts ahead of the
/// transaction-manager-level default (spec §4.2 "locked in ascending
/// account-id order").
pub async fn lock_for_update_with_mode(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    target: &AccountRef,
    require_active: bool,
    mode: LockMode,
) -> Result<Account> {
    let found = match target {
        AccountRef::Holder(holder_id) => tx.lock_account_by_holder(ledger, holder_id, mode).await?,
        AccountRef::System(system_id) => tx.lock_account_by_system_id(ledger, system_id, mode).await?,
    };
    let account = found.ok_or_else(|| LedgerError::NotFound(format!("account {target}")))?;
    verify_checksum(ctx, &account)?;
    if require_active {
        account.require_active()?;
    }
    Ok(account)
}

/// Read-only lookup for query paths that do not intend to mutate the row.
pub async fn get_account(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    holder_id: &str,
) -> Result<Account> {
    let account = tx
        .get_account_readonly(ledger, holder_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {holder_id}")))?;
    verify_checksum(ctx, &account)?;
    Ok(account)
}

fn verify_checksum(ctx: &LedgerContext, account: &Account) -> Result<()> {
    let secret = ctx.options.advanced.hmac_secret.as_deref();
    if !verify_account_checksum(secret, account) {
        return Err(LedgerError::IntegrityFailure(format!(
            "checksum mismatch for account {}",
            account.id
        )));
    }
    Ok(())
}

/// Ascending-id lock ordering for multi-account operations (spec §4.2,
/// §5 "the sole policy that prevents deadlock"). Resolves every target first
/// (without locking — account ids are unknown until resolved), then locks in
/// id order.
pub async fn resolve_and_lock_in_order(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    targets: &[AccountRef],
    require_active: bool,
) -> Result<Vec<Account>> {
    let mut ids_and_targets = Vec::with_capacity(targets.len());
    for target in targets {
        let preview = match target {
            AccountRef::Holder(h) => tx.get_account_readonly(ledger, h).await?,
            AccountRef::System(s) => tx.lock_account_by_system_id(ledger, s, LockMode::Optimistic).await?,
        };
        let preview = preview.ok_or_else(|| LedgerError::NotFound(format!("account {target}")))?;
        ids_and_targets.push((preview.id, target.clone()));
    }
    ids_and_targets.sort_by_key(|(id, _)| *id);

    let mut locked = Vec::with_capacity(targets.len());
    for (_, target) in ids_and_targets {
        locked.push(lock_for_update(ctx, tx, ledger, &target, require_active).await?);
    }
    Ok(locked)
}
