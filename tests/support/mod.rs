//! Shared harness for controller integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use helmsman::{Context, Outcome, Reconciler, UnstructuredResource};

/// Scriptable reconciler that records every invocation.
///
/// Outcomes are popped from a script queue (plain success once the script
/// runs out). An optional gate semaphore holds each invocation open until
/// the test releases a permit, which is how tests keep a run in flight
/// while enqueueing more events.
pub struct TestReconciler {
    invocations: AtomicUsize,
    deletion_invocations: AtomicUsize,
    running: AtomicUsize,
    peak_concurrency: AtomicUsize,
    attempts_seen: Mutex<Vec<u32>>,
    gate: Option<Arc<Semaphore>>,
    script: Mutex<VecDeque<Outcome>>,
}

impl TestReconciler {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            deletion_invocations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
            attempts_seen: Mutex::new(Vec::new()),
            gate: None,
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        let mut reconciler = Self::new();
        reconciler.gate = Some(gate);
        reconciler
    }

    pub fn scripted(outcomes: Vec<Outcome>) -> Self {
        let reconciler = Self::new();
        *reconciler.script.lock().unwrap() = outcomes.into();
        reconciler
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn deletion_invocations(&self) -> usize {
        self.deletion_invocations.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    pub fn attempts_seen(&self) -> Vec<u32> {
        self.attempts_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reconciler<UnstructuredResource> for TestReconciler {
    async fn reconcile(&self, _resource: UnstructuredResource, ctx: &Context) -> Outcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(now, Ordering::SeqCst);
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if ctx.deletion_pass {
            self.deletion_invocations.fetch_add(1, Ordering::SeqCst);
        }
        self.attempts_seen.lock().unwrap().push(ctx.attempt);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Outcome::success)
    }
}

/// Install the test tracing subscriber. Safe to call from every test; only
/// the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a widget snapshot with the given version and generation.
pub fn widget(name: &str, version: &str, generation: i64) -> UnstructuredResource {
    UnstructuredResource::new("ns", name, "Widget")
        .with_resource_version(version)
        .with_generation(generation)
}

/// Poll until `check` is true or the deadline passes. Returns whether the
/// condition was met.
pub async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
