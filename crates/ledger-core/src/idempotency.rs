//! Idempotency key record (spec §3 "Idempotency Key", §4.6).

use serde::{Deserialize, Serialize};

use crate::types::{LedgerId, Timestamp};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub ledger_id: LedgerId,
    pub key: String,
    pub reference: String,
    /// Opaque cached result (the operation's success payload, serialized).
    pub cached_result: serde_json::Value,
    pub expires_at: Timestamp,
}

/// Outcome of an idempotency check (spec §4.6 `check_key`).
pub enum IdempotencyCheck {
    AlreadyProcessed(serde_json::Value),
    New,
}
