//! Outbox entry (spec §3 "Outbox Entry", §4.8, §6 "Outbox topics").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

/// Stable outbox topic strings (spec §6).
pub mod topics {
    pub const ACCOUNT_CREDITED: &str = "ledger-account-credited";
    pub const ACCOUNT_DEBITED: &str = "ledger-account-debited";
    pub const HOLD_CREATED: &str = "ledger-hold-created";
    pub const HOLD_COMMITTED: &str = "ledger-hold-committed";
    pub const HOLD_VOIDED: &str = "ledger-hold-voided";
    pub const HOLD_EXPIRED: &str = "ledger-hold-expired";
    pub const ACCOUNT_AUTO_UNFROZEN: &str = "ledger-account-auto-unfrozen";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

impl OutboxEntry {
    pub fn new(topic: &str, payload: serde_json::Value, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            created_at: now,
        }
    }
}
