//! Background job queue for peer operations
//!
//! Announcements triggered by Put are queued here instead of being sent
//! inline, so a Put returns once its chunks are stored locally.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;

use super::directory::PeerDirectory;
use super::protocol::Subject;
use crate::context::Context;

/// Most jobs drained from the queue in one pass of the worker
const MAX_BATCH: usize = 256;

/// Background jobs that can be dispatched to the peer worker
#[derive(Debug, Clone)]
pub enum Job {
    /// Tell known peers we now hold these subjects
    Announce { subjects: Vec<Subject> },
}

/// Cloneable handle for queueing jobs from anywhere in the store
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a dispatcher and the receiver the worker consumes
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Queue a job; fails only once the worker has gone away
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::trace!(?job, "dispatching job");
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    pub fn dispatch_announce(&self, subjects: Vec<Subject>) -> Result<()> {
        if subjects.is_empty() {
            return Ok(());
        }
        self.dispatch(Job::Announce { subjects })
    }
}

#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Try to receive a job without blocking
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}

/// Process jobs until `ctx` is cancelled or every dispatcher is dropped
///
/// Jobs already waiting in the queue are merged, so a burst of chunk pushes
/// turns into a handful of announce messages.
pub async fn run_worker(receiver: JobReceiver, directory: Arc<PeerDirectory>, ctx: Context) {
    let mut stream = receiver.into_async().ready_chunks(MAX_BATCH);

    loop {
        let batch = tokio::select! {
            _ = ctx.cancelled() => break,
            batch = stream.next() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        let mut subjects = Vec::new();
        for job in batch {
            match job {
                Job::Announce { subjects: s } => subjects.extend(s),
            }
        }
        subjects.sort();
        subjects.dedup();

        let count = subjects.len();
        match directory.announce(&ctx, subjects).await {
            Ok(acks) => tracing::debug!(count, acks, "announced subjects"),
            Err(e) => tracing::warn!(count, error = %e, "announce job failed"),
        }
    }

    tracing::debug!("peer worker stopped");
}
