//! The context object the core is parameterized by (spec §6, §9).
//!
//! The source threads a context object through every call; a systems-language
//! rendering replaces this with an explicit borrowed handle (spec §9,
//! "Context passing vs. global state") containing the adapter handle,
//! options, and hooks — no module-level mutable state anywhere in this
//! workspace.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Amount, Currency};

/// `options.advanced.*` (spec §6).
#[derive(Clone, Debug)]
pub struct AdvancedOptions {
    pub max_transaction_amount: Amount,
    /// HMAC key for entry-hash/checksum computation. `None` falls back to
    /// plain SHA-256 (spec §6, "weakens auditability; documented trade-off").
    pub hmac_secret: Option<Vec<u8>>,
    pub lock_mode: LockMode,
    pub idempotency_ttl_ms: i64,
    pub enable_batching: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            max_transaction_amount: i64::MAX,
            hmac_secret: None,
            lock_mode: LockMode::Wait,
            idempotency_ttl_ms: crate::constants::DEFAULT_IDEMPOTENCY_TTL_MS,
            enable_batching: false,
        }
    }
}

/// Row-level lock mode (spec §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Wait,
    NoWait,
    Optimistic,
}

/// `options.system_accounts.*` (spec §6). Maps a logical name (`"world"`) to
/// the concrete `system_identifier` string used in the accounts table.
#[derive(Clone, Debug)]
pub struct SystemAccounts {
    pub by_name: HashMap<String, String>,
}

impl Default for SystemAccounts {
    fn default() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert("world".to_string(), crate::constants::DEFAULT_WORLD_ACCOUNT.to_string());
        Self { by_name }
    }
}

impl SystemAccounts {
    pub fn world(&self) -> &str {
        self.by_name
            .get("world")
            .map(|s| s.as_str())
            .unwrap_or(crate::constants::DEFAULT_WORLD_ACCOUNT)
    }
}

#[derive(Clone, Debug)]
pub struct LedgerOptions {
    pub schema: String,
    pub currency: Currency,
    pub advanced: AdvancedOptions,
    pub system_accounts: SystemAccounts,
}

/// Resolves an integer exchange rate for a currency pair when the caller
/// does not supply one (spec §4.2, "a resolver callback may supply one").
pub trait FxResolver: Send + Sync {
    fn resolve(&self, src: &Currency, dst: &Currency) -> Result<Option<i64>>;
}

/// A no-op resolver used when no `fx_resolver` is configured.
pub struct NoFxResolver;

impl FxResolver for NoFxResolver {
    fn resolve(&self, _src: &Currency, _dst: &Currency) -> Result<Option<i64>> {
        Ok(None)
    }
}

/// The context the core is parameterized by. Threaded explicitly through
/// every public operation rather than stored as module-level state.
#[derive(Clone)]
pub struct LedgerContext {
    pub options: Arc<LedgerOptions>,
    pub fx_resolver: Arc<dyn FxResolver>,
}

impl LedgerContext {
    pub fn new(options: LedgerOptions) -> Self {
        Self {
            options: Arc::new(options),
            fx_resolver: Arc::new(NoFxResolver),
        }
    }

    pub fn with_fx_resolver(mut self, resolver: Arc<dyn FxResolver>) -> Self {
        self.fx_resolver = resolver;
        self
    }
}
