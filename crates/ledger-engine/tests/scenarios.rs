//! End-to-end scenarios exercising the transaction manager, hold manager,
//! and velocity limiter together against the in-memory fake store.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use ledger_core::{
    Account, AccountLimit, AccountStatus, Currency, HolderType, LedgerContext, LedgerId,
    LedgerOptions, LimitType, SystemAccounts, TransferStatus,
};
use ledger_engine::holds::{commit_hold, create_multi_destination_hold, expire_holds, HoldDestination};
use ledger_engine::transaction_manager::{CreditRequest, DebitRequest, TransactionManager, TransferRequest};
use ledger_storage::{FakeStorage, Storage};

fn ctx() -> LedgerContext {
    LedgerContext::new(LedgerOptions {
        schema: "public".to_string(),
        currency: Currency::new("USD").unwrap(),
        advanced: ledger_core::AdvancedOptions {
            hmac_secret: Some(b"test-secret".to_vec()),
            max_transaction_amount: 1_000_000_000,
            ..Default::default()
        },
        system_accounts: SystemAccounts::default(),
    })
}

fn account(ledger: LedgerId, is_system: bool, name: &str, currency: &str, balance: i64) -> Account {
    Account {
        id: Uuid::new_v4(),
        ledger_id: ledger,
        holder_id: if is_system { None } else { Some(name.to_string()) },
        system_identifier: if is_system { Some(name.to_string()) } else { None },
        is_system,
        holder_type: if is_system { HolderType::System } else { HolderType::Individual },
        currency: Currency::new(currency).unwrap(),
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
async fn scenario_1_simple_transfer() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let world = account(ledger, true, "@World", "USD", 0);
    let a = account(ledger, false, "A", "USD", 0);
    let b = account(ledger, false, "B", "USD", 0);
    storage.seed_account(world).await;
    storage.seed_account(a.clone()).await;
    storage.seed_account(b.clone()).await;

    let mgr = TransactionManager::new(Arc::new(storage.clone()), c);
    mgr.credit(CreditRequest {
        ledger, holder: "A".to_string(), amount: 1000, reference: "credit-a".to_string(),
        category: None, source_system: None, idempotency_key: None, effective_date: None,
    }).await.unwrap();
    mgr.transfer(TransferRequest {
        ledger, src_holder: "A".to_string(), dst_holder: "B".to_string(), amount: 300,
        reference: "a-to-b".to_string(), exchange_rate: None, idempotency_key: None,
        effective_date: None, balancing: false, force: false,
    }).await.unwrap();

    assert_eq!(storage.account(a.id).await.unwrap().balance, 700);
    assert_eq!(storage.account(b.id).await.unwrap().balance, 300);

    let entries = storage.all_entries().await;
    let a_entries: Vec<_> = entries.iter().filter(|e| e.account_id == a.id).collect();
    assert_eq!(a_entries.len(), 2);
    assert_eq!(a_entries[0].amount, 1000);
    assert_eq!(a_entries[1].amount, 300);
    assert!(a_entries[1].prev_hash.as_deref() == Some(a_entries[0].hash.as_str()));
}

#[tokio::test]
async fn scenario_2_hold_commit_partial() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let world = account(ledger, true, "@World", "USD", 0);
    let a = account(ledger, false, "A", "USD", 0);
    let b = account(ledger, false, "B", "USD", 0);
    storage.seed_account(world).await;
    storage.seed_account(a.clone()).await;
    storage.seed_account(b.clone()).await;

    let mgr = TransactionManager::new(Arc::new(storage.clone()), c.clone());
    mgr.credit(CreditRequest {
        ledger, holder: "A".to_string(), amount: 500, reference: "credit-a".to_string(),
        category: None, source_system: None, idempotency_key: None, effective_date: None,
    }).await.unwrap();

    let now = Utc::now();
    let expires = now + chrono::Duration::minutes(5);
    let mut tx = storage.begin().await.unwrap();
    let hold = create_multi_destination_hold(
        &c, tx.as_mut(), ledger, "A",
        &[HoldDestination { holder: "B".to_string(), amount: 400 }],
        "hold-1", None, expires, now,
    ).await.unwrap();
    tx.commit().await.unwrap();

    let after_hold = storage.account(a.id).await.unwrap();
    assert_eq!(after_hold.pending_debit, 400);
    assert_eq!(after_hold.available(), 100);

    let mut tx = storage.begin().await.unwrap();
    let committed = commit_hold(&c, tx.as_mut(), ledger, hold.id, Some(250), now).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(committed.status, TransferStatus::Posted);
    assert_eq!(committed.committed_amount, Some(250));
    assert_eq!(storage.account(a.id).await.unwrap().balance, 250);
    assert_eq!(storage.account(a.id).await.unwrap().pending_debit, 0);
    assert_eq!(storage.account(b.id).await.unwrap().balance, 250);
}

#[tokio::test]
async fn scenario_3_hold_expire_race() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let a = account(ledger, false, "A", "USD", 500);
    storage.seed_account(a.clone()).await;

    let create_now = Utc::now();
    let expires = create_now + chrono::Duration::seconds(1);
    let mut tx = storage.begin().await.unwrap();
    let hold = ledger_engine::holds::create_hold(&c, tx.as_mut(), ledger, "A", 200, "hold-race", None, expires, create_now)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // The sweeper claims the hold first; a concurrent commit attempt against
    // the same (now expired) row sees it already transitioned.
    let after_expiry = expires + chrono::Duration::seconds(1);
    let expired_count = expire_holds(&c, &storage, 10, after_expiry).await.unwrap();
    assert_eq!(expired_count, 1);

    let mut tx = storage.begin().await.unwrap();
    let commit_after_expiry = commit_hold(&c, tx.as_mut(), ledger, hold.id, None, after_expiry).await;
    assert!(commit_after_expiry.is_err());
    let hold_after = tx.get_transfer(hold.id).await.unwrap().unwrap();
    tx.commit().await.unwrap();

    assert_eq!(storage.account(a.id).await.unwrap().pending_debit, 0);
    assert_eq!(hold_after.status, TransferStatus::Expired);
}

#[tokio::test]
async fn scenario_4_daily_limit() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let world = account(ledger, true, "@World", "USD", 0);
    let a = account(ledger, false, "A", "USD", 0);
    storage.seed_account(world).await;
    storage.seed_account(a.clone()).await;
    storage.seed_limit(AccountLimit {
        account_id: a.id,
        limit_type: LimitType::Daily,
        category: Some("payout".to_string()),
        max_amount: 1000,
        enabled: true,
    }).await;

    let mgr = TransactionManager::new(Arc::new(storage.clone()), c);
    mgr.credit(CreditRequest {
        ledger, holder: "A".to_string(), amount: 5000, reference: "fund".to_string(),
        category: None, source_system: None, idempotency_key: None, effective_date: None,
    }).await.unwrap();

    mgr.debit(DebitRequest {
        ledger, holder: "A".to_string(), amount: 600, reference: "payout-1".to_string(),
        category: Some("payout".to_string()), ..Default::default()
    }).await.unwrap();

    let err = mgr.debit(DebitRequest {
        ledger, holder: "A".to_string(), amount: 500, reference: "payout-2".to_string(),
        category: Some("payout".to_string()), ..Default::default()
    }).await.unwrap_err();
    assert!(matches!(err, ledger_core::LedgerError::LimitExceeded { .. }));

    mgr.debit(DebitRequest {
        ledger, holder: "A".to_string(), amount: 500, reference: "other-1".to_string(),
        category: Some("other".to_string()), ..Default::default()
    }).await.unwrap();

    assert_eq!(storage.account(a.id).await.unwrap().balance, 3900);
}

#[tokio::test]
async fn scenario_5_idempotent_retry() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let world = account(ledger, true, "@World", "USD", 0);
    let a = account(ledger, false, "A", "USD", 0);
    storage.seed_account(world).await;
    storage.seed_account(a.clone()).await;

    let mgr = TransactionManager::new(Arc::new(storage.clone()), c);
    let req = CreditRequest {
        ledger, holder: "A".to_string(), amount: 100, reference: "r1".to_string(),
        category: None, source_system: None, idempotency_key: Some("k1".to_string()), effective_date: None,
    };

    let first = mgr.credit(req.clone()).await.unwrap();
    let second = mgr.credit(req).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(storage.account(a.id).await.unwrap().balance, 100);
    let entries_for_a = storage.all_entries().await.into_iter().filter(|e| e.account_id == a.id).count();
    assert_eq!(entries_for_a, 1);
}

#[tokio::test]
async fn scenario_6_cross_currency() {
    let c = ctx();
    let storage = FakeStorage::new(Utc::now());
    let ledger = LedgerId(Uuid::new_v4());
    let world = account(ledger, true, "@World", "USD", 0);
    let a = account(ledger, false, "A", "USD", 1000);
    let b = account(ledger, false, "B", "EUR", 0);
    storage.seed_account(world).await;
    storage.seed_account(a.clone()).await;
    storage.seed_account(b.clone()).await;

    let mgr = TransactionManager::new(Arc::new(storage.clone()), c);
    let transfer = mgr.transfer(TransferRequest {
        ledger, src_holder: "A".to_string(), dst_holder: "B".to_string(), amount: 100,
        reference: "fx-1".to_string(), exchange_rate: Some(920_000), idempotency_key: None,
        effective_date: None, balancing: false, force: false,
    }).await.unwrap();

    assert_eq!(storage.account(a.id).await.unwrap().balance, 900);
    assert_eq!(storage.account(b.id).await.unwrap().balance, 92);
    assert_eq!(transfer.metadata.get("crossCurrency").and_then(|v| v.as_bool()), Some(true));
}
