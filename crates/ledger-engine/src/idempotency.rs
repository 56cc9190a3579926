//! Idempotency Layer (spec §4.6). Reads and writes happen inside the caller's
//! posting transaction — the whole point is that a replayed request sees the
//! same row as a write in flight, which only holds if both share a
//! transaction (spec: "otherwise a race allows double-posting").

use chrono::{DateTime, Utc};

use ledger_core::{IdempotencyCheck, IdempotencyRecord, LedgerId, Result};
use ledger_storage::LedgerTx;

/// Looks up `(ledger, key)`. A hit means this exact operation already ran to
/// completion; the cached result must be returned verbatim with no further
/// writes (spec "Replay contract").
pub async fn check_key(
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    key: Option<&str>,
) -> Result<IdempotencyCheck> {
    let Some(key) = key else {
        return Ok(IdempotencyCheck::New);
    };
    match tx.check_idempotency_key(ledger, key).await? {
        Some(record) => Ok(IdempotencyCheck::AlreadyProcessed(record.cached_result)),
        None => Ok(IdempotencyCheck::New),
    }
}

/// Upserts `(ledger, key) -> result` with `expires_at = now + ttl_ms`. Only
/// called after an operation succeeds — failed attempts are never cached
/// (spec §7 "no cached failure is recorded; only successes are cached").
pub async fn save_key(
    tx: &mut dyn LedgerTx,
    ledger: LedgerId,
    key: &str,
    reference: &str,
    result: serde_json::Value,
    ttl_ms: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let record = IdempotencyRecord {
        ledger_id: ledger,
        key: key.to_string(),
        reference: reference.to_string(),
        cached_result: result,
        expires_at: now + chrono::Duration::milliseconds(ttl_ms),
    };
    tx.save_idempotency_key(&record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_storage::{FakeStorage, Storage};
    use uuid::Uuid;

    #[tokio::test]
    async fn absent_key_is_new() {
        let storage = FakeStorage::new(Utc::now());
        let mut tx = storage.begin().await.unwrap();
        let ledger = LedgerId(Uuid::new_v4());
        let result = check_key(tx.as_mut(), ledger, Some("k1")).await.unwrap();
        assert!(matches!(result, IdempotencyCheck::New));
    }

    #[tokio::test]
    async fn saved_key_replays_cached_result() {
        let storage = FakeStorage::new(Utc::now());
        let ledger = LedgerId(Uuid::new_v4());

        let mut tx = storage.begin().await.unwrap();
        save_key(
            tx.as_mut(),
            ledger,
            "k1",
            "r1",
            serde_json::json!({"ok": true}),
            86_400_000,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx2 = storage.begin().await.unwrap();
        let result = check_key(tx2.as_mut(), ledger, Some("k1")).await.unwrap();
        match result {
            IdempotencyCheck::AlreadyProcessed(v) => assert_eq!(v, serde_json::json!({"ok": true})),
            IdempotencyCheck::New => panic!("expected cached result"),
        }
    }

    #[tokio::test]
    async fn no_key_supplied_is_always_new() {
        let storage = FakeStorage::new(Utc::now());
        let mut tx = storage.begin().await.unwrap();
        let ledger = LedgerId(Uuid::new_v4());
        let result = check_key(tx.as_mut(), ledger, None).await.unwrap();
        assert!(matches!(result, IdempotencyCheck::New));
    }
}
