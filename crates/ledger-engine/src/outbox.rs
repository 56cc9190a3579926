//! Outbox (spec §4.8): append a domain event inside the caller's posting
//! transaction. An external dispatcher (out of scope) reads, publishes, and
//! marks delivered — standard transactional-outbox semantics.

use chrono::{DateTime, Utc};

use ledger_core::{OutboxEntry, Result};
use ledger_storage::LedgerTx;

pub async fn publish(
    tx: &mut dyn LedgerTx,
    topic: &str,
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<()> {
    tx.append_outbox(&OutboxEntry::new(topic, payload, now)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::outbox::topics;
    use ledger_storage::{FakeStorage, Storage};

    #[tokio::test]
    async fn publish_appends_one_row() {
        let storage = FakeStorage::new(Utc::now());
        let mut tx = storage.begin().await.unwrap();
        publish(tx.as_mut(), topics::ACCOUNT_CREDITED, serde_json::json!({"amount": 100}), Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = storage.outbox().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, topics::ACCOUNT_CREDITED);
    }
}
