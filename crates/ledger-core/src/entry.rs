//! Entry: one side of a posting (spec §3 "Entry").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Amount, Currency, Timestamp, Version};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_type", rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn opposite(self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }

    /// Signed delta this entry type applies to a balance: +amount for
    /// credit, -amount for debit (E3).
    pub fn signed_delta(self, amount: Amount) -> Amount {
        match self {
            EntryType::Credit => amount,
            EntryType::Debit => -amount,
        }
    }
}

/// Optional FX fields, populated only for cross-currency legs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FxFields {
    pub source_currency: Option<Currency>,
    pub exchange_rate: Option<i64>,
}

/// One side of a posting on a specific account (spec §3 "Entry").
///
/// E1: `hash = H(prev_hash ‖ canonical(entry_fields))`.
/// E2: per account, `entry_k.prev_hash = entry_{k-1}.hash`; first entry's
///     `prev_hash = None`.
/// E3: `balance_after = balance_before +/- amount` matching `entry_type`.
/// E4: `account_version` is the version the account reached after this entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub currency: Currency,
    pub sequence_number: i64,
    /// `None` for hot (system-account) entries per spec §4.4 ("entry_core
    /// omits balance_before/after and sets an isHot marker").
    pub balance_before: Option<Amount>,
    pub balance_after: Option<Amount>,
    pub account_version: Version,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub is_hot: bool,
    pub effective_date: chrono::NaiveDate,
    pub fx: FxFields,
    pub created_at: Timestamp,
}

impl Entry {
    /// E3 check for non-hot entries.
    pub fn balance_identity_holds(&self) -> bool {
        match (self.balance_before, self.balance_after) {
            (Some(before), Some(after)) => after == before + self.entry_type.signed_delta(self.amount),
            (None, None) => self.is_hot,
            _ => false,
        }
    }
}
