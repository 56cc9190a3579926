//! `ledger-core` — shared domain types for the ledger workspace.
//!
//! Defines the persisted data model (spec §3): accounts, transfers, entries,
//! limits, idempotency keys, outbox entries, and status-log rows, plus the
//! error taxonomy and the context object the rest of the workspace is
//! parameterized by.

pub mod account;
pub mod constants;
pub mod context;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod limit;
pub mod outbox;
pub mod status_log;
pub mod transfer;
pub mod types;

pub use account::{Account, AccountStatus, HolderType, StatusChangeMeta};
pub use context::{AdvancedOptions, FxResolver, LedgerContext, LedgerOptions, LockMode, SystemAccounts};
pub use entry::{Entry, EntryType, FxFields};
pub use error::{LedgerError, Result};
pub use idempotency::{IdempotencyCheck, IdempotencyRecord};
pub use limit::{AccountLimit, LimitType};
pub use outbox::OutboxEntry;
pub use status_log::{EntityStatusLogEntry, EntityType};
pub use transfer::{Transfer, TransferStateMachine, TransferStatus, TransferType};
pub use types::{Amount, AccountRef, Currency, LedgerId, Timestamp, Version};
