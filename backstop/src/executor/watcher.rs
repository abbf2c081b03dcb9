//! Fixed-delay driver for the periodic watchers.
//!
//! Each watcher runs in its own task: tick, sleep for the period, repeat.
//! A tick is awaited before the next sleep starts, so two ticks of the same
//! watcher never overlap. A failed tick is logged and the schedule goes on;
//! the unit of work it opened has already been rolled back.

use super::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One periodic scan-claim-process-commit loop.
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one tick as a single unit of work.
    ///
    /// Returns how many claimed rows were acted on.
    async fn tick(&self) -> Result<usize>;
}

/// Spawns `watcher` on a fixed-delay schedule until `shutdown` fires.
pub(crate) fn spawn_watcher<W: Watcher>(
    watcher: W,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("{} started (period={:?})", watcher.name(), period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = watcher.tick() => match result {
                    Ok(0) => debug!("{} tick: nothing to do", watcher.name()),
                    Ok(count) => debug!("{} tick handled {} rows", watcher.name(), count),
                    Err(e) => warn!("{} tick failed, rolled back: {}", watcher.name(), e),
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }

        info!("{} stopped", watcher.name());
    })
}
