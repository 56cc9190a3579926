use thiserror::Error;

/// Domain-level error taxonomy (spec §7). Every variant here is surfaced to
/// the caller; nothing in a mutation path is silently swallowed.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Input validation ─────────────────────────────────────────────────────
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Lookup ────────────────────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    // ── State transitions ────────────────────────────────────────────────────
    #[error("conflict: {0}")]
    Conflict(String),

    // ── Balance / overdraft ──────────────────────────────────────────────────
    #[error("insufficient balance: need {need}, available {available}")]
    InsufficientBalance { need: i64, available: i64 },

    // ── Velocity ──────────────────────────────────────────────────────────────
    #[error("limit exceeded: {limit_type} cap {max_amount} for account {account_id}")]
    LimitExceeded {
        account_id: String,
        limit_type: String,
        max_amount: i64,
    },

    // ── Holds ─────────────────────────────────────────────────────────────────
    #[error("hold {0} is no longer inflight")]
    HoldExpired(String),

    // ── Concurrency ───────────────────────────────────────────────────────────
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    // ── Integrity ─────────────────────────────────────────────────────────────
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    // ── Storage plumbing ──────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Catch-all for invariant violations that should never occur ──────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable machine-readable error code, as would be surfaced across a
    /// process boundary (used in tests and in outbox/log fields).
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::LimitExceeded { .. } => "limit_exceeded",
            LedgerError::HoldExpired(_) => "hold_expired",
            LedgerError::ResourceBusy(_) => "resource_busy",
            LedgerError::Timeout(_) => "timeout",
            LedgerError::IntegrityFailure(_) => "integrity_failure",
            LedgerError::Storage(_) => "internal",
            LedgerError::Serialization(_) => "internal",
            LedgerError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
