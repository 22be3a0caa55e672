//! Per-identity reconciliation dispatch core.
//!
//! The controller turns a concurrent, at-least-once notification stream
//! into strictly serialized per-identity reconciliations:
//!
//! - **Ingestion**: scope + significance checks, then enqueue into the
//!   identity's event buffer. Never blocks on worker availability.
//! - **Dispatch**: each identity moves through `Idle -> Scheduled ->
//!   Running -> (Idle | Scheduled)`. Only the `Scheduled -> Running` claim
//!   under the state-table lock grants the execution token, so two workers
//!   can never run the same identity concurrently.
//! - **Completion**: events buffered during a run coalesce into exactly one
//!   follow-up; failures consult the retry policy; successful deletions
//!   tear the identity's state down after the finalizer is confirmed
//!   cleared.
//!
//! All per-identity state lives in the table owned here; nothing else
//! mutates it, and the worker holding an identity's token is the only
//! writer for that entry while it runs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::EventBuffer;
use crate::cache::ResourceCache;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeKind, Event, EventKind, WatchEvent};
use crate::executor::{ReconciliationExecutor, WorkRunner};
use crate::filter;
use crate::reconciler::{Context, Outcome, Reconciler};
use crate::resource::{Resource, ResourceIdentity};
use crate::retry::RetryState;
use crate::store::StoreClient;

/// Execution phase of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run active, no run queued.
    Idle,
    /// A work item is queued for the executor.
    Scheduled,
    /// A worker holds the identity's execution token.
    Running,
}

/// Finalizer lifecycle state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// No finalizer recorded.
    Absent,
    /// Finalizer recorded on the resource.
    Present,
    /// Cleanup succeeded; only the store-side clear remains.
    PendingRemoval,
}

/// All dispatch state for one identity.
///
/// Created on the first observed event, destroyed once a deletion has been
/// fully processed with no events pending.
struct IdentityState<R: Resource> {
    phase: Phase,
    buffer: EventBuffer,
    retry: RetryState,
    finalizer: FinalizerState,
    last_known: Option<R>,
    deleting: bool,
    /// Bumped on every claim; armed timers capture it and fire only if no
    /// newer run happened in between.
    epoch: u64,
}

impl<R: Resource> IdentityState<R> {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            buffer: EventBuffer::new(),
            retry: RetryState::new(),
            finalizer: FinalizerState::Absent,
            last_known: None,
            deleting: false,
            epoch: 0,
        }
    }
}

/// What a worker decided about one completed run.
enum RunDisposition {
    /// Callback (and any status write) succeeded.
    Completed { requeue_after: Option<Duration> },
    /// Callback, finalizer write or status write failed.
    Failed { error: Error, retryable: bool },
    /// Deletion cleanup not finished; re-check later.
    CleanupPending,
    /// Deletion fully processed; identity state can be torn down.
    Removed,
}

/// Snapshot of identity state taken while claiming the execution token.
struct Claim<R: Resource> {
    event: Option<Event>,
    attempt: u32,
    deletion: bool,
    finalizer: FinalizerState,
    snapshot: Option<R>,
}

/// Deferred action decided under the table lock, performed after release.
enum FollowUp {
    Immediate,
    Timer { delay: Duration, epoch: u64 },
}

struct Inner<R: Resource> {
    config: ControllerConfig<R>,
    reconciler: Arc<dyn Reconciler<R>>,
    cache: Arc<dyn ResourceCache<R>>,
    store: Arc<dyn StoreClient>,
    table: Mutex<HashMap<ResourceIdentity, IdentityState<R>>>,
    executor: OnceLock<ReconciliationExecutor>,
    me: Weak<Inner<R>>,
}

/// Reconciliation dispatch core for one controller.
pub struct Controller<R: Resource> {
    inner: Arc<Inner<R>>,
}

impl<R: Resource> Controller<R> {
    /// Create a controller and start its worker pool.
    pub fn new(
        config: ControllerConfig<R>,
        reconciler: Arc<dyn Reconciler<R>>,
        cache: Arc<dyn ResourceCache<R>>,
        store: Arc<dyn StoreClient>,
    ) -> Result<Self> {
        let workers = config.workers;
        let inner = Arc::new_cyclic(|me| Inner {
            config,
            reconciler,
            cache,
            store,
            table: Mutex::new(HashMap::new()),
            executor: OnceLock::new(),
            me: me.clone(),
        });

        let runner = Arc::downgrade(&inner);
        let runner: Weak<dyn WorkRunner> = runner;
        let executor = ReconciliationExecutor::spawn(workers, runner);
        inner
            .executor
            .set(executor)
            .map_err(|_| Error::invalid_config("executor already started"))?;

        info!(
            controller = %inner.config.name,
            workers,
            "controller started"
        );
        Ok(Self { inner })
    }

    /// Controller configuration.
    pub fn config(&self) -> &ControllerConfig<R> {
        &self.inner.config
    }

    /// Feed one raw notification from the watch stream.
    pub async fn handle_watch_event(&self, event: WatchEvent<R>) {
        self.inner.ingest(event).await;
    }

    /// Manually request a reconciliation for an identity.
    pub async fn trigger(&self, identity: ResourceIdentity) {
        self.inner
            .enqueue(identity.clone(), Event::manual(identity), None)
            .await;
    }

    /// Current phase of an identity, if tracked.
    pub async fn phase_of(&self, identity: &ResourceIdentity) -> Option<Phase> {
        let table = self.inner.table.lock().await;
        table.get(identity).map(|state| state.phase)
    }

    /// Current finalizer state of an identity, if tracked.
    pub async fn finalizer_state_of(&self, identity: &ResourceIdentity) -> Option<FinalizerState> {
        let table = self.inner.table.lock().await;
        table.get(identity).map(|state| state.finalizer)
    }

    /// Completed attempts in the identity's current failure chain.
    pub async fn retry_attempts_of(&self, identity: &ResourceIdentity) -> u32 {
        let table = self.inner.table.lock().await;
        table
            .get(identity)
            .map(|state| state.retry.attempts())
            .unwrap_or(0)
    }

    /// Number of identities with live dispatch state.
    pub async fn tracked_identities(&self) -> usize {
        self.inner.table.lock().await.len()
    }

    /// Whether every tracked identity is idle with an empty buffer.
    pub async fn is_quiescent(&self) -> bool {
        let table = self.inner.table.lock().await;
        table
            .values()
            .all(|state| state.phase == Phase::Idle && state.buffer.is_empty())
    }
}

impl<R: Resource> Inner<R> {
    async fn ingest(&self, watch: WatchEvent<R>) {
        let Some(identity) = watch.identity() else {
            warn!("dropping notification without any snapshot");
            return;
        };

        if let Some(snapshot) = watch.latest_snapshot() {
            if !self.config.in_scope(snapshot) {
                debug!(identity = %identity, "notification out of scope");
                return;
            }
        }

        if watch.kind == ChangeKind::Modified {
            if let (Some(previous), Some(current)) = (&watch.previous, &watch.current) {
                if previous.resource_version() == current.resource_version() {
                    debug!(identity = %identity, "duplicate delivery, same resource version");
                    return;
                }
                if !filter::evaluate_fail_open(
                    self.config.filter(),
                    &identity,
                    previous,
                    current,
                ) {
                    debug!(identity = %identity, "update filtered as insignificant");
                    return;
                }
            }
            // A modification without a previous snapshot (resync) cannot be
            // compared; treat it as significant.
        }

        let observed = watch.latest_snapshot().map(Resource::resource_version);
        let event = Event::new(identity.clone(), EventKind::from(watch.kind), observed);
        let snapshot = watch.latest_snapshot().cloned();
        self.enqueue(identity, event, snapshot).await;
    }

    async fn enqueue(&self, identity: ResourceIdentity, event: Event, snapshot: Option<R>) {
        let submit = {
            let mut table = self.table.lock().await;
            let state = table
                .entry(identity.clone())
                .or_insert_with(IdentityState::new);

            if let Some(snapshot) = snapshot {
                if state.deleting
                    && event.kind == EventKind::Added
                    && !snapshot.deletion_requested()
                {
                    // The resource came back under the same identity while a
                    // deletion was still pending (or after one gave up);
                    // restart a fresh lifecycle instead of routing the
                    // recreated resource into cleanup.
                    debug!(identity = %identity, "resource recreated, deletion state reset");
                    state.deleting = false;
                    state.retry.reset();
                    state.finalizer = if snapshot.has_finalizer(&self.config.finalizer_name) {
                        FinalizerState::Present
                    } else {
                        FinalizerState::Absent
                    };
                }
                // A snapshot already carrying our finalizer means a previous
                // incarnation (or another replica) recorded it; syncing the
                // state here is what keeps replayed adds from re-writing it.
                if self.config.use_finalizer
                    && state.finalizer == FinalizerState::Absent
                    && snapshot.has_finalizer(&self.config.finalizer_name)
                {
                    state.finalizer = FinalizerState::Present;
                }
                state.last_known = Some(snapshot);
            }
            if event.kind == EventKind::Deleted {
                state.deleting = true;
            }

            debug!(identity = %identity, kind = ?event.kind, phase = ?state.phase, "event enqueued");
            state.buffer.enqueue(event);

            if state.phase == Phase::Idle {
                state.phase = Phase::Scheduled;
                true
            } else {
                false
            }
        };
        if submit {
            self.submit(identity);
        }
    }

    fn submit(&self, identity: ResourceIdentity) {
        let Some(executor) = self.executor.get() else {
            error!(identity = %identity, "executor not started, dropping work item");
            return;
        };
        if let Err(err) = executor.submit(identity.clone()) {
            error!(identity = %identity, error = %err, "work submission failed");
        }
    }

    async fn run_identity(&self, identity: ResourceIdentity) {
        let claim = {
            let mut table = self.table.lock().await;
            let Some(state) = table.get_mut(&identity) else {
                return;
            };
            // The claim is the execution token: anything other than
            // Scheduled means this submission was superseded.
            if state.phase != Phase::Scheduled {
                return;
            }
            state.phase = Phase::Running;
            state.epoch = state.epoch.wrapping_add(1);

            let pending_deletion = state.buffer.has_deletion();
            let event = state.buffer.drain_for_execution();
            let deletion = state.deleting
                || pending_deletion
                || state
                    .last_known
                    .as_ref()
                    .is_some_and(Resource::deletion_requested);
            state.deleting = deletion;

            Claim {
                event,
                attempt: state.retry.attempts(),
                deletion,
                finalizer: state.finalizer,
                snapshot: state.last_known.clone(),
            }
        };

        let disposition = self.execute(&identity, claim).await;
        self.complete(identity, disposition).await;
    }

    async fn execute(&self, identity: &ResourceIdentity, claim: Claim<R>) -> RunDisposition {
        debug!(
            identity = %identity,
            event = ?claim.event.as_ref().map(|event| event.kind),
            attempt = claim.attempt,
            deletion = claim.deletion,
            "reconciliation run starting"
        );

        // The cache is the source of truth for current known state; the
        // snapshot seen at ingestion covers the window before the cache
        // catches up (and the deletion pass, where the cache entry is gone).
        let snapshot = self.cache.get(identity).or(claim.snapshot);
        let Some(snapshot) = snapshot else {
            debug!(identity = %identity, "no snapshot available, clearing state");
            return RunDisposition::Removed;
        };

        if claim.deletion || snapshot.deletion_requested() {
            return self
                .execute_deletion(identity, snapshot, claim.attempt, claim.finalizer)
                .await;
        }

        // Add-finalizer-on-first-sight, before the first reconcile attempt.
        // This write fails and retries independently of the callback.
        if self.config.use_finalizer && claim.finalizer == FinalizerState::Absent {
            if snapshot.has_finalizer(&self.config.finalizer_name) {
                self.set_finalizer_state(identity, FinalizerState::Present)
                    .await;
            } else {
                match self
                    .store
                    .add_finalizer(identity, &self.config.finalizer_name)
                    .await
                {
                    Ok(written) => {
                        debug!(identity = %identity, written, "finalizer ensured");
                        self.set_finalizer_state(identity, FinalizerState::Present)
                            .await;
                    }
                    Err(err) => {
                        return RunDisposition::Failed {
                            error: Error::finalizer_write(identity.clone(), err.to_string()),
                            retryable: true,
                        };
                    }
                }
            }
        }

        let ctx = Context::new(identity.clone(), claim.attempt);
        match self.invoke_callback(snapshot, &ctx).await {
            Outcome::Success {
                requeue_after,
                status_patch,
            } => {
                if let Some(patch) = status_patch {
                    if let Err(err) = self.store.write_status(identity, patch).await {
                        return RunDisposition::Failed {
                            error: Error::status_write(identity.clone(), err.to_string()),
                            retryable: true,
                        };
                    }
                }
                RunDisposition::Completed { requeue_after }
            }
            Outcome::Failed { reason, retryable } => RunDisposition::Failed {
                error: Error::callback(identity.clone(), reason),
                retryable,
            },
            Outcome::CleanupPending => {
                warn!(
                    identity = %identity,
                    "cleanup-pending outcome outside a deletion pass, treating as success"
                );
                RunDisposition::Completed {
                    requeue_after: None,
                }
            }
        }
    }

    async fn execute_deletion(
        &self,
        identity: &ResourceIdentity,
        snapshot: R,
        attempt: u32,
        finalizer: FinalizerState,
    ) -> RunDisposition {
        if !self.config.use_finalizer {
            // Without a finalizer the deletion is delivered once; a success
            // outcome clears the identity's state.
            let ctx = Context::deletion(identity.clone(), attempt);
            return match self.invoke_callback(snapshot, &ctx).await {
                Outcome::Success { .. } => RunDisposition::Removed,
                Outcome::Failed { reason, retryable } => RunDisposition::Failed {
                    error: Error::callback(identity.clone(), reason),
                    retryable,
                },
                Outcome::CleanupPending => RunDisposition::CleanupPending,
            };
        }

        if finalizer == FinalizerState::Absent
            && !snapshot.has_finalizer(&self.config.finalizer_name)
        {
            // Nothing guards the resource; physical removal already went
            // through externally.
            return RunDisposition::Removed;
        }

        if finalizer != FinalizerState::PendingRemoval {
            let ctx = Context::deletion(identity.clone(), attempt);
            match self.invoke_callback(snapshot, &ctx).await {
                Outcome::Success { .. } => {
                    self.set_finalizer_state(identity, FinalizerState::PendingRemoval)
                        .await;
                }
                Outcome::Failed { reason, retryable } => {
                    return RunDisposition::Failed {
                        error: Error::callback(identity.clone(), reason),
                        retryable,
                    };
                }
                Outcome::CleanupPending => return RunDisposition::CleanupPending,
            }
        }

        // Cleanup succeeded (now or on an earlier attempt); only the
        // store-side clear remains before the identity is gone.
        match self
            .store
            .remove_finalizer(identity, &self.config.finalizer_name)
            .await
        {
            Ok(written) => {
                debug!(identity = %identity, written, "finalizer cleared");
                RunDisposition::Removed
            }
            Err(err) => RunDisposition::Failed {
                error: Error::finalizer_write(identity.clone(), err.to_string()),
                retryable: true,
            },
        }
    }

    async fn invoke_callback(&self, resource: R, ctx: &Context) -> Outcome {
        let invocation = self.reconciler.reconcile(resource, ctx);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(&panic);
                warn!(identity = %ctx.identity, reason = %reason, "reconciler panicked");
                Outcome::Failed {
                    reason: format!("reconciler panicked: {reason}"),
                    retryable: true,
                }
            }
        }
    }

    async fn set_finalizer_state(&self, identity: &ResourceIdentity, finalizer: FinalizerState) {
        let mut table = self.table.lock().await;
        if let Some(state) = table.get_mut(identity) {
            state.finalizer = finalizer;
        }
    }

    async fn complete(&self, identity: ResourceIdentity, disposition: RunDisposition) {
        let follow_up = {
            let mut table = self.table.lock().await;
            let Some(state) = table.get_mut(&identity) else {
                return;
            };
            match disposition {
                RunDisposition::Removed => {
                    if state.buffer.is_empty() {
                        info!(identity = %identity, "deletion processed, identity state removed");
                        table.remove(&identity);
                        None
                    } else {
                        // The resource reappeared while the deletion was in
                        // flight; restart a fresh lifecycle with the pending
                        // events.
                        state.deleting = false;
                        state.finalizer = FinalizerState::Absent;
                        state.retry.reset();
                        state.phase = Phase::Scheduled;
                        Some(FollowUp::Immediate)
                    }
                }
                RunDisposition::Completed { requeue_after } => {
                    state.retry.reset();
                    if !state.buffer.is_empty() {
                        // Coalesced follow-up: one run regardless of how many
                        // events arrived during this one.
                        state.phase = Phase::Scheduled;
                        Some(FollowUp::Immediate)
                    } else if let Some(delay) = requeue_after {
                        state.phase = Phase::Idle;
                        Some(FollowUp::Timer {
                            delay,
                            epoch: state.epoch,
                        })
                    } else {
                        state.phase = Phase::Idle;
                        None
                    }
                }
                RunDisposition::CleanupPending => {
                    if !state.buffer.is_empty() {
                        state.phase = Phase::Scheduled;
                        Some(FollowUp::Immediate)
                    } else {
                        state.phase = Phase::Idle;
                        Some(FollowUp::Timer {
                            delay: self.config.cleanup_recheck,
                            epoch: state.epoch,
                        })
                    }
                }
                RunDisposition::Failed { error, retryable } => {
                    state.retry.record_failure(error.to_string());
                    let attempts = state.retry.attempts();
                    if !state.buffer.is_empty() {
                        // Newer events supersede the backoff.
                        warn!(
                            identity = %identity,
                            error = %error,
                            attempts,
                            "reconciliation failed, newer events pending"
                        );
                        state.phase = Phase::Scheduled;
                        Some(FollowUp::Immediate)
                    } else if retryable && self.config.retry_policy.should_retry(attempts) {
                        let delay = self.config.retry_policy.delay_for(attempts);
                        warn!(
                            identity = %identity,
                            error = %error,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            "reconciliation failed, retry scheduled"
                        );
                        state.phase = Phase::Idle;
                        Some(FollowUp::Timer {
                            delay,
                            epoch: state.epoch,
                        })
                    } else {
                        // Exhausted (or non-retryable). The identity stays
                        // live; the next external event starts a fresh chain.
                        error!(
                            identity = %identity,
                            error = %error,
                            attempts,
                            "reconciliation failed, giving up until a new event arrives"
                        );
                        state.retry.reset();
                        state.phase = Phase::Idle;
                        None
                    }
                }
            }
        };

        match follow_up {
            Some(FollowUp::Immediate) => self.submit(identity),
            Some(FollowUp::Timer { delay, epoch }) => self.arm_timer(identity, delay, epoch),
            None => {}
        }
    }

    fn arm_timer(&self, identity: ResourceIdentity, delay: Duration, epoch: u64) {
        let weak = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.fire_timer(identity, epoch).await;
        });
    }

    async fn fire_timer(&self, identity: ResourceIdentity, epoch: u64) {
        let submit = {
            let mut table = self.table.lock().await;
            let Some(state) = table.get_mut(&identity) else {
                return;
            };
            // Superseded when any newer run claimed the identity since the
            // timer was armed.
            if state.phase != Phase::Idle || state.epoch != epoch {
                debug!(identity = %identity, "timer superseded");
                return;
            }
            state.buffer.enqueue(Event::timer(identity.clone()));
            state.phase = Phase::Scheduled;
            true
        };
        if submit {
            self.submit(identity);
        }
    }
}

#[async_trait]
impl<R: Resource> WorkRunner for Inner<R> {
    async fn run(&self, identity: ResourceIdentity) {
        self.run_identity(identity).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
