//! Bounded worker pool for reconciliation runs.
//!
//! Submission is an unbounded channel so the event-ingestion path never
//! blocks on pool availability; concurrency is bounded by a semaphore
//! sized to the configured worker count. Identities share the pool rather
//! than owning threads, so one slow reconciliation cannot starve the rest
//! beyond ordinary pool contention. Double-submission is prevented
//! upstream by the per-identity `Scheduled` state, not here.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::ResourceIdentity;

/// Work consumer invoked by pool workers, one identity at a time.
#[async_trait]
pub trait WorkRunner: Send + Sync + 'static {
    /// Run the pending work for an identity. Implementations isolate
    /// callback panics internally; a panic escaping here only loses the
    /// spawned task, never the pool.
    async fn run(&self, identity: ResourceIdentity);
}

/// Handle for submitting identities to the worker pool.
#[derive(Debug, Clone)]
pub struct ReconciliationExecutor {
    tx: mpsc::UnboundedSender<ResourceIdentity>,
}

impl ReconciliationExecutor {
    /// Spawn the pool: a dispatcher task plus up to `workers` concurrent
    /// run tasks.
    ///
    /// The runner is held weakly so the pool winds down once its owner is
    /// dropped instead of keeping it alive forever.
    pub fn spawn(workers: usize, runner: Weak<dyn WorkRunner>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ResourceIdentity>();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));

        tokio::spawn(async move {
            while let Some(identity) = rx.recv().await {
                let Some(runner) = runner.upgrade() else {
                    break;
                };
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    // Semaphore closed; the pool is shutting down.
                    break;
                };
                tokio::spawn(async move {
                    debug!(identity = %identity, "worker picked up identity");
                    runner.run(identity).await;
                    drop(permit);
                });
            }
            debug!("executor dispatcher stopped");
        });

        Self { tx }
    }

    /// Submit an identity for execution. Never blocks.
    pub fn submit(&self, identity: ResourceIdentity) -> Result<()> {
        self.tx.send(identity).map_err(|_| Error::ChannelClosed)
    }
}
