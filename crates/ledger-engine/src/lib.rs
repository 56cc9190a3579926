//! `ledger-engine` — the transaction engine (spec §4): account resolution,
//! double-entry posting, holds, velocity limits, idempotency, the
//! transactional outbox, batching, and the background sweeper/cleanup jobs
//! that keep the velocity log and hold table bounded.
//!
//! Modules are laid out in the dependency order from leaves to root:
//! idempotency and outbox have no engine-internal dependencies; the poster
//! and velocity limiter build on those; the resolver builds on the poster;
//! the hold manager and transaction manager build on the resolver; the
//! batch engine and sweeper sit on top of everything.

pub mod batch;
pub mod holds;
pub mod idempotency;
pub mod lifecycle;
pub mod outbox;
pub mod poster;
pub mod resolver;
pub mod sweeper;
pub mod transaction_manager;
pub mod velocity;

pub use batch::{BatchEngine, BatchRequest};
pub use transaction_manager::{
    CreditRequest, DebitRequest, Destination, MultiTransferRequest, TransactionManager,
    TransferRequest,
};
