//! Entry & Balance Poster (spec §4.4): given an account, an entry type, and
//! an amount, appends one hash-chained entry and advances the account
//! snapshot under a version guard.

use chrono::NaiveDate;
use uuid::Uuid;

use ledger_core::{
    Account, Entry, EntryType, FxFields, LedgerContext, LedgerId, Result, Timestamp,
};
use ledger_crypto::chain::{next_entry_hash, EntryCore};
use ledger_crypto::checksum::compute_checksum;
use ledger_storage::{resource_busy, LedgerTx};

/// Result of posting one entry: the appended entry plus the account snapshot
/// as it now stands (callers fold this into their own working copy so a
/// second posting in the same transfer sees the post-state).
pub struct Posted {
    pub entry: Entry,
    pub account: Account,
}

/// Appends an entry for `account` and updates its row. System ("hot", spec
/// §4.4 "Hot accounts") entries skip the balance/credit/debit fields — the
/// entry log is their canonical truth — but the row's `version` still
/// advances and is persisted, so `account_version` keeps increasing across
/// repeated postings to the same hot account.
#[allow(clippy::too_many_arguments)]
pub async fn post_entry(
    ctx: &LedgerContext,
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    account: &Account,
    transfer_id: Uuid,
    entry_type: EntryType,
    amount: i64,
    effective_date: NaiveDate,
    fx: FxFields,
    now: Timestamp,
) -> Result<Posted> {
    let expected_version = account.version;
    let sequence_number = tx.next_sequence_number(ledger).await?;
    let prev_hash = tx
        .last_entry_for_account(account.id)
        .await?
        .map(|e| e.hash);

    let mut updated = account.clone();
    let (balance_before, balance_after) = if account.is_system {
        (None, None)
    } else {
        let before = account.balance;
        let after = before + entry_type.signed_delta(amount);
        updated.balance = after;
        match entry_type {
            EntryType::Credit => updated.credit_balance += amount,
            EntryType::Debit => updated.debit_balance += amount,
        }
        (Some(before), Some(after))
    };

    updated.version = expected_version + 1;
    let secret = ctx.options.advanced.hmac_secret.as_deref();
    updated.checksum = compute_checksum(
        secret,
        updated.balance,
        updated.credit_balance,
        updated.debit_balance,
        updated.pending_debit,
        updated.pending_credit,
        updated.version,
    );

    let core = EntryCore {
        transfer_id,
        account_id: account.id,
        entry_type,
        amount,
        currency: &account.currency,
        balance_before,
        balance_after,
        account_version: updated.version,
        is_hot: account.is_system,
    };
    let hash = next_entry_hash(secret, prev_hash.as_deref(), &core);

    let entry = Entry {
        id: Uuid::new_v4(),
        transfer_id,
        account_id: account.id,
        entry_type,
        amount,
        currency: account.currency.clone(),
        sequence_number,
        balance_before,
        balance_after,
        account_version: updated.version,
        prev_hash,
        hash,
        is_hot: account.is_system,
        effective_date,
        fx,
        created_at: now,
    };

    tx.insert_entry(&entry).await?;

    // Hot accounts skip the balance/credit/debit update above (`updated`
    // already equals `account` on those fields) but the row is still
    // written so `version` — and therefore `account_version` on the next
    // entry — keeps advancing. Without this, every entry posted to the
    // same hot account between reads of a stale snapshot would carry the
    // same `account_version` (spec.md:180, Testable Property 5).
    let ok = tx.update_account_conditional(&updated, expected_version).await?;
    if !ok {
        return Err(resource_busy("poster: account version drift"));
    }

    Ok(Posted { entry, account: updated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::{AccountStatus, Currency, HolderType, LedgerOptions, SystemAccounts};
    use ledger_storage::FakeStorage;
    use ledger_storage::Storage;

    fn ctx() -> LedgerContext {
        LedgerContext::new(LedgerOptions {
            schema: "public".to_string(),
            currency: Currency::new("USD").unwrap(),
            advanced: ledger_core::AdvancedOptions {
                hmac_secret: Some(b"test-key".to_vec()),
                ..Default::default()
            },
            system_accounts: SystemAccounts::default(),
        })
    }

    fn account(ledger: LedgerId, is_system: bool, balance: i64) -> Account {
        Account {
            id: Uuid::new_v4(),
            ledger_id: ledger,
            holder_id: if is_system { None } else { Some("alice".to_string()) },
            system_identifier: if is_system { Some("@World".to_string()) } else { None },
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
    async fn posting_a_credit_advances_balance_and_version() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let acc = account(ledger, false, 0);
        storage.seed_account(acc.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let posted = post_entry(
            &c,
            tx.as_mut(),
            ledger,
            &acc,
            Uuid::new_v4(),
            EntryType::Credit,
            1000,
            Utc::now().date_naive(),
            FxFields::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(posted.account.balance, 1000);
        assert_eq!(posted.account.version, 2);
        assert_eq!(posted.entry.balance_before, Some(0));
        assert_eq!(posted.entry.balance_after, Some(1000));
        assert!(posted.entry.prev_hash.is_none());
    }

    #[tokio::test]
    async fn hot_system_entries_omit_balance_fields_and_skip_account_update() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let world = account(ledger, true, 0);
        storage.seed_account(world.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let posted = post_entry(
            &c,
            tx.as_mut(),
            ledger,
            &world,
            Uuid::new_v4(),
            EntryType::Debit,
            1000,
            Utc::now().date_naive(),
            FxFields::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(posted.entry.balance_before.is_none());
        assert!(posted.entry.balance_after.is_none());
        assert!(posted.entry.is_hot);
        // account version still advances so its entries keep a valid chain
        assert_eq!(posted.account.version, 2);
    }

    #[tokio::test]
    async fn repeated_hot_account_postings_never_repeat_account_version() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let world = account(ledger, true, 0);
        storage.seed_account(world.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let first = post_entry(
            &c, tx.as_mut(), ledger, &world, Uuid::new_v4(), EntryType::Debit, 100,
            Utc::now().date_naive(), FxFields::default(), Utc::now(),
        ).await.unwrap();

        // A second posting that re-reads the account from storage (as two
        // independent transfers would) must see the persisted version bump
        // from the first posting, not the original stale snapshot.
        let reloaded = storage.account(world.id).await.unwrap();
        assert_eq!(reloaded.version, first.account.version);

        let second = post_entry(
            &c, tx.as_mut(), ledger, &reloaded, Uuid::new_v4(), EntryType::Debit, 100,
            Utc::now().date_naive(), FxFields::default(), Utc::now(),
        ).await.unwrap();
        tx.commit().await.unwrap();

        assert_ne!(first.entry.account_version, second.entry.account_version);
        assert_eq!(storage.account(world.id).await.unwrap().version, second.account.version);
    }

    #[tokio::test]
    async fn second_entry_chains_to_the_first() {
        let c = ctx();
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());
        let acc = account(ledger, false, 0);
        storage.seed_account(acc.clone()).await;

        let mut tx = storage.begin().await.unwrap();
        let first = post_entry(
            &c, tx.as_mut(), ledger, &acc, Uuid::new_v4(), EntryType::Credit, 500,
            Utc::now().date_naive(), FxFields::default(), Utc::now(),
        ).await.unwrap();

        let second = post_entry(
            &c, tx.as_mut(), ledger, &first.account, Uuid::new_v4(), EntryType::Debit, 100,
            Utc::now().date_naive(), FxFields::default(), Utc::now(),
        ).await.unwrap();

        assert_eq!(second.entry.prev_hash.as_deref(), Some(first.entry.hash.as_str()));
    }
}
