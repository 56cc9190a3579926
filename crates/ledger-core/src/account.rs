//! Account snapshot and status (spec §3 "Account").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::types::{Amount, Currency, LedgerId, Timestamp, Version};

/// Account lifecycle status. Closed tagged variant, exhaustively matched at
/// every transition point (spec §9 "Sum types for status").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

/// What kind of holder owns this account (for reporting only; does not
/// affect posting semantics).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "holder_type", rename_all = "lowercase")]
pub enum HolderType {
    Individual,
    Business,
    System,
}

/// Metadata recorded when an account is frozen or closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusChangeMeta {
    pub reason: Option<String>,
    pub at: Timestamp,
    /// When set on a `Frozen` account, the auto-unfreeze sweeper transitions
    /// it back to `Active` once this time has passed (spec §6, topic
    /// `ledger-account-auto-unfrozen`). `None` means the freeze only lifts
    /// through an explicit unfreeze call.
    pub auto_unfreeze_at: Option<Timestamp>,
}

/// Full account snapshot as read from / written to the backing store.
///
/// Invariants (spec §3):
/// - I1: `balance = credit_balance - debit_balance`
/// - I2: `pending_debit >= 0`, `pending_credit >= 0`
/// - I3: overdraft guard (see [`Account::available`] / [`Account::check_available`])
/// - I4: `version` strictly increases on every balance-affecting change
/// - I5: `checksum` equals the keyed hash of the snapshot at `version`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub ledger_id: LedgerId,
    /// External stable identifier for user accounts (`None` for pure system accounts
    /// identified only by `system_identifier`).
    pub holder_id: Option<String>,
    pub system_identifier: Option<String>,
    pub is_system: bool,
    pub holder_type: HolderType,
    pub currency: Currency,
    pub status: AccountStatus,
    pub allow_overdraft: bool,
    pub overdraft_limit: Amount,
    pub balance: Amount,
    pub credit_balance: Amount,
    pub debit_balance: Amount,
    pub pending_debit: Amount,
    pub pending_credit: Amount,
    pub version: Version,
    pub checksum: String,
    pub status_meta: Option<StatusChangeMeta>,
    pub created_at: Timestamp,
}

impl Account {
    /// Funds available for new debits/holds: `balance - pending_debit`,
    /// bounded below by `-overdraft_limit` when overdraft is allowed (I3).
    pub fn available(&self) -> Amount {
        self.balance - self.pending_debit
    }

    /// Validates I3 for a prospective `available` value after a would-be change.
    pub fn check_available(&self, prospective_available: Amount) -> Result<()> {
        let floor = if self.allow_overdraft {
            -self.overdraft_limit
        } else {
            0
        };
        if prospective_available < floor {
            return Err(LedgerError::InsufficientBalance {
                need: floor - prospective_available,
                available: prospective_available - floor,
            });
        }
        Ok(())
    }

    pub fn require_active(&self) -> Result<()> {
        if !self.status.is_operational() {
            return Err(LedgerError::Conflict(format!(
                "account {} is {:?}, not active",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// I1 check: recomputes `balance` from the credit/debit sides.
    pub fn balance_identity_holds(&self) -> bool {
        self.balance == self.credit_balance - self.debit_balance
    }
}
