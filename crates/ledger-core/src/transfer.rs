//! Transfer (transaction record) and its state machine (spec §3, §4.2).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::types::{Amount, Currency, LedgerId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_type", rename_all = "lowercase")]
pub enum TransferType {
    Credit,
    Debit,
    Transfer,
    Journal,
    Correction,
    Adjustment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "lowercase")]
pub enum TransferStatus {
    Inflight,
    Posted,
    Voided,
    Expired,
    Reversed,
}

/// The transfer status state machine (spec §4.2 T2).
///
/// ```text
///  (create) ──────────────► inflight ───commit──► posted
///                                │
///                                ├───void────► voided
///                                │
///                                └──expire───► expired
///  posted ──refund(part)──► posted (refunded_amount += x)
///  posted ──refund(full)──► reversed
/// ```
/// A non-hold posting is created directly in `posted`.
pub struct TransferStateMachine;

impl TransferStateMachine {
    pub fn valid_transitions(current: TransferStatus) -> &'static [TransferStatus] {
        use TransferStatus::*;
        match current {
            Inflight => &[Posted, Voided, Expired],
            Posted => &[Posted, Reversed],
            Voided | Expired | Reversed => &[],
        }
    }

    pub fn can_transition(from: TransferStatus, to: TransferStatus) -> bool {
        Self::valid_transitions(from).contains(&to)
    }

    pub fn transition(from: TransferStatus, to: TransferStatus) -> Result<TransferStatus> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(LedgerError::Conflict(format!(
                "invalid transfer status transition from {from:?} to {to:?}"
            )))
        }
    }
}

/// A logical money movement (spec §3 "Transfer").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub ledger_id: LedgerId,
    pub transfer_type: TransferType,
    pub status: TransferStatus,
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
    pub description: Option<String>,
    pub source_account_id: Option<Uuid>,
    pub destination_account_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub is_hold: bool,
    pub hold_expires_at: Option<Timestamp>,
    pub parent_id: Option<Uuid>,
    pub is_reversal: bool,
    pub committed_amount: Option<Amount>,
    pub refunded_amount: Amount,
    pub effective_date: chrono::NaiveDate,
    pub posted_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Transfer {
    /// T3: `refunded_amount <= amount`.
    pub fn refundable_remaining(&self) -> Amount {
        self.amount - self.refunded_amount
    }

    /// T4: `committed_amount <= amount` when hold.
    pub fn check_committed_amount(&self, committed: Amount) -> Result<()> {
        if self.is_hold && committed > self.amount {
            return Err(LedgerError::InvalidArgument(format!(
                "committed amount {committed} exceeds hold amount {}",
                self.amount
            )));
        }
        Ok(())
    }

    /// Deterministic refund reference: `refund_<original.reference>[_p<cumulative>]`
    /// so retries with the same cumulative amount collapse via idempotency
    /// (spec §4.2 "Refund").
    pub fn refund_reference(&self, cumulative_refunded: Amount) -> String {
        if cumulative_refunded >= self.amount {
            format!("refund_{}", self.reference)
        } else {
            format!("refund_{}_p{}", self.reference, cumulative_refunded)
        }
    }
}
