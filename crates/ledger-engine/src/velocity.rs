//! Velocity Limiter (spec §4.5): per-transaction, daily, and monthly caps
//! enforced at posting time, plus the retention cleanup job for the log
//! those caps are computed over.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use uuid::Uuid;

use ledger_core::{EntryType, LedgerError, LimitType, Result};
use ledger_storage::{LedgerTx, Storage};

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).unwrap()
}

/// Evaluates every enabled limit on `account_id` against a prospective
/// posting of `amount`, in evaluation order (per_transaction, daily,
/// monthly — spec §4.5), and returns the first violation.
pub async fn enforce_limits(
    tx: &mut dyn LedgerTx,
    account_id: Uuid,
    entry_type: Option<EntryType>,
    category: Option<&str>,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let limits = tx.get_limits(account_id).await?;

    for limit_type in LimitType::EVALUATION_ORDER {
        let Some(limit) = limits
            .iter()
            .find(|l| l.limit_type == limit_type && l.category.as_deref() == category)
        else {
            continue;
        };

        let projected = match limit_type {
            LimitType::PerTransaction => amount,
            LimitType::Daily => {
                tx.sum_entries_since(account_id, entry_type, category, start_of_day(now)).await? + amount
            }
            LimitType::Monthly => {
                tx.sum_entries_since(account_id, entry_type, category, start_of_month(now)).await? + amount
            }
        };

        if projected > limit.max_amount {
            return Err(LedgerError::LimitExceeded {
                account_id: account_id.to_string(),
                limit_type: format!("{limit_type:?}").to_lowercase(),
                max_amount: limit.max_amount,
            });
        }
    }
    Ok(())
}

/// Drops velocity-log rows older than `retention` in batches of `batch_size`,
/// pausing `pause` between batches to avoid long table locks (spec §4.5).
/// Runs its own transaction per batch since this is a background job, not
/// part of any caller's posting transaction.
pub async fn cleanup_loop(
    storage: Arc<dyn Storage>,
    retention: chrono::Duration,
    batch_size: i64,
    pause: Duration,
) {
    loop {
        let cutoff = Utc::now() - retention;
        match run_cleanup_batch(storage.as_ref(), cutoff, batch_size).await {
            Ok(0) => break,
            Ok(removed) => {
                tracing::debug!(removed, %cutoff, "velocity log cleanup batch");
                tokio::time::sleep(pause).await;
            }
            Err(e) => {
                // auxiliary logging path (spec §7): log and continue rather
                // than propagate — there is no caller to propagate to.
                tracing::warn!(error = %e, "velocity log cleanup batch failed");
                break;
            }
        }
    }
}

async fn run_cleanup_batch(storage: &dyn Storage, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64> {
    let mut tx = storage.begin().await?;
    let removed = tx.delete_velocity_log_older_than(cutoff, batch_size).await?;
    tx.commit().await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::AccountLimit;
    use ledger_storage::FakeStorage;

    #[tokio::test]
    async fn per_transaction_limit_rejects_oversized_amount() {
        let storage = FakeStorage::new(Utc::now());
        let account_id = Uuid::new_v4();
        storage
            .seed_limit(AccountLimit {
                account_id,
                limit_type: LimitType::PerTransaction,
                category: None,
                max_amount: 100,
                enabled: true,
            })
            .await;

        let mut tx = storage.begin().await.unwrap();
        let err = enforce_limits(tx.as_mut(), account_id, None, None, 101, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LimitExceeded { .. }));
    }

    #[tokio::test]
    async fn daily_limit_allows_other_category() {
        let storage = FakeStorage::new(Utc::now());
        let account_id = Uuid::new_v4();
        storage
            .seed_limit(AccountLimit {
                account_id,
                limit_type: LimitType::Daily,
                category: Some("payout".to_string()),
                max_amount: 1000,
                enabled: true,
            })
            .await;

        let mut tx = storage.begin().await.unwrap();
        // no limit configured for "other", so it's unconstrained
        enforce_limits(tx.as_mut(), account_id, None, Some("other"), 5000, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_limit_is_not_enforced() {
        let storage = FakeStorage::new(Utc::now());
        let account_id = Uuid::new_v4();
        storage
            .seed_limit(AccountLimit {
                account_id,
                limit_type: LimitType::PerTransaction,
                category: None,
                max_amount: 10,
                enabled: false,
            })
            .await;

        let mut tx = storage.begin().await.unwrap();
        enforce_limits(tx.as_mut(), account_id, None, None, 1_000_000, Utc::now())
            .await
            .unwrap();
    }
}
