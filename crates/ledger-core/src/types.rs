//! Primitive identifiers and scalar types shared across the ledger crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Monetary quantity in the smallest currency unit (e.g. cents).
///
/// Represented as a signed 64-bit integer per the persisted schema contract;
/// callers must never construct a negative `Amount` for a request — negative
/// intermediates only appear inside refund/balancing arithmetic.
pub type Amount = i64;

/// Monotonic per-account/per-entry version counter.
pub type Version = i64;

/// UTC timestamp with time-zone awareness.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Tenant boundary. Every entity carries a `LedgerId`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerId(pub Uuid);

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerId({})", self.0)
    }
}

/// Identifies an account row: either an external holder id or a system
/// identifier (e.g. `@World`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountRef {
    Holder(String),
    System(String),
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Holder(h) => write!(f, "{h}"),
            AccountRef::System(s) => write!(f, "{s}"),
        }
    }
}

/// ISO-4217 currency code. Always exactly 3 ASCII letters, upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Option<Self> {
        let code = code.into().to_ascii_uppercase();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
            Some(Self(code))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange rate scaled by 10^6 (spec §4.2: "integer `exchange_rate` scaled by 10^6").
pub const EXCHANGE_RATE_SCALE: i64 = 1_000_000;

/// Apply a scaled exchange rate to a source amount, rounding to nearest unit.
///
/// `round(amount * rate / 10^6)` per spec §4.2.
pub fn apply_exchange_rate(amount: Amount, rate: i64) -> Option<Amount> {
    let amount = i128::from(amount);
    let rate = i128::from(rate);
    let scale = i128::from(EXCHANGE_RATE_SCALE);
    let numerator = amount.checked_mul(rate)?;
    // round-half-up on a non-negative numerator (amounts and rates are both >= 0)
    let rounded = (numerator + scale / 2) / scale;
    i64::try_from(rounded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_rejects_wrong_length() {
        assert!(Currency::new("US").is_none());
        assert!(Currency::new("USDX").is_none());
    }

    #[test]
    fn currency_upper_cases() {
        assert_eq!(Currency::new("usd").unwrap().as_str(), "USD");
    }

    #[test]
    fn exchange_rate_applies_and_rounds() {
        // 100 USD at 0.92 -> 92 EUR
        assert_eq!(apply_exchange_rate(100, 920_000), Some(92));
        // rounding: 1 unit at rate 1_500_000 (1.5) -> 2 (round half up... actually exact)
        assert_eq!(apply_exchange_rate(10, 333_333), Some(3));
    }
}
