//! Expiry Sweeper background loop (spec §4.3 "expire_holds" run on a timer).
//! Mirrors [`crate::velocity::cleanup_loop`]'s shape: a long-lived task the
//! node binary spawns once at startup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use ledger_core::LedgerContext;
use ledger_storage::Storage;

use crate::holds;
use crate::lifecycle;

/// Runs [`holds::expire_holds`] every `interval`, forever. Errors opening a
/// batch are logged and the loop keeps going — a missed tick just means the
/// next one claims a bigger batch.
pub async fn run(ctx: LedgerContext, storage: Arc<dyn Storage>, batch_size: i64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        match holds::expire_holds(&ctx, storage.as_ref(), batch_size, now).await {
            Ok(expired) => {
                if expired > 0 {
                    tracing::debug!(expired, "expiry sweeper pass");
                }
            }
            // auxiliary logging path (spec §7): the sweeper is a background
            // job with no caller to propagate to.
            Err(e) => tracing::warn!(error = %e, "expiry sweeper pass failed"),
        }
    }
}

/// Runs [`lifecycle::run_auto_unfreeze_sweep`] every `interval`, forever.
pub async fn run_auto_unfreeze(ctx: LedgerContext, storage: Arc<dyn Storage>, batch_size: i64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        match lifecycle::run_auto_unfreeze_sweep(&ctx, storage.as_ref(), batch_size, now).await {
            Ok(unfrozen) => {
                if unfrozen > 0 {
                    tracing::debug!(unfrozen, "auto-unfreeze sweeper pass");
                }
            }
            Err(e) => tracing::warn!(error = %e, "auto-unfreeze sweeper pass failed"),
        }
    }
}
