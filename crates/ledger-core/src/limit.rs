//! Account velocity limits (spec §3 "AccountLimit", §4.5).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Amount;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "limit_type", rename_all = "snake_case")]
pub enum LimitType {
    PerTransaction,
    Daily,
    Monthly,
}

impl LimitType {
    /// Evaluation order per spec §4.5: per_transaction first, then daily,
    /// then monthly.
    pub const EVALUATION_ORDER: [LimitType; 3] =
        [LimitType::PerTransaction, LimitType::Daily, LimitType::Monthly];
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountLimit {
    pub account_id: Uuid,
    pub limit_type: LimitType,
    pub category: Option<String>,
    pub max_amount: Amount,
    pub enabled: bool,
}
