use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::StoreInner;
use crate::context::{CancelHandle, Context};
use crate::peer::TransferError;
use crate::publication::RecordProvider;

/// A running seed loop; see [`super::Store::seed`]
///
/// Stopping ends the loop but retracts nothing: chunks stay on disk and
/// announcements lapse on their own ttl.
#[derive(Debug)]
pub struct SeedHandle {
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl SeedHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "seed task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(super) fn spawn<R: RecordProvider>(inner: Arc<StoreInner<R>>) -> SeedHandle {
    let (ctx, cancel) = inner.ctx.with_cancel();
    let task = tokio::spawn(run(inner, ctx));
    SeedHandle { cancel, task }
}

async fn run<R: RecordProvider>(inner: Arc<StoreInner<R>>, ctx: Context) {
    let mut ticker = tokio::time::interval(inner.options.reannounce_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval = ?inner.options.reannounce_interval, "seeding");

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pruned = inner.directory.prune_expired();
        let reached = match inner.directory.refresh(&ctx).await {
            Ok(reached) => reached,
            Err(_) => break,
        };
        let acks = match inner.transfer.reannounce(&ctx).await {
            Ok(acks) => acks,
            Err(TransferError::Cancelled(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "reannounce failed");
                0
            }
        };
        tracing::debug!(pruned, reached, acks, "seed round complete");
    }

    tracing::info!("seeding stopped");
}
