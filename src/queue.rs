//! # Work Queue and Worker Pool
//!
//! Deduplicating queue between the watch streams and the reconcile workers,
//! plus the pool of workers that drains it.
//!
//! A key is carried at most once among the pending items, and at most one
//! worker reconciles a given key at a time. Events for a key whose pass is
//! already running set a dirty marker instead, and the key is re-admitted the
//! moment that pass finishes, so a burst of events collapses into one prompt
//! pass plus one follow-up rather than a pile of redundant work.
//!
//! Failed passes come back through per-key Fibonacci backoff; a successful
//! pass clears the key's backoff history.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backoff::BackoffState;
use crate::observability::metrics;
use crate::reconciler::{Outcome, Reconciler};
use crate::state::ReconcileKey;

#[derive(Debug, Default)]
struct QueueState {
    pending: HashSet<ReconcileKey>,
    in_flight: HashSet<ReconcileKey>,
    dirty: HashSet<ReconcileKey>,
}

/// Handle to the shared queue. Clones feed and drain the same queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<ReconcileKey>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ReconcileKey>>>,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Admits `key` unless it is already waiting. A key currently being
    /// reconciled is marked dirty and comes back once that pass finishes.
    pub async fn enqueue(&self, key: ReconcileKey) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if !state.pending.insert(key.clone()) {
            return;
        }
        // The receiver lives as long as any handle, so delivery cannot fail.
        let _ = self.tx.send(key);
    }

    /// Takes the next key and marks it in flight. One consumer drains the
    /// channel at a time, which is what keeps a key on a single worker.
    ///
    /// Resolves to `None` only once every handle able to feed the queue has
    /// been dropped.
    pub async fn next(&self) -> Option<ReconcileKey> {
        let key = self.rx.lock().await.recv().await?;
        let mut state = self.state.lock().await;
        state.pending.remove(&key);
        state.in_flight.insert(key.clone());
        Some(key)
    }

    /// Retires a finished pass. When events arrived mid-pass the key is
    /// immediately re-admitted; returns whether that happened.
    pub async fn finish(&self, key: &ReconcileKey) -> bool {
        let resubmit = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(key);
            state.dirty.remove(key)
        };
        if resubmit {
            self.enqueue(key.clone()).await;
        }
        resubmit
    }

    /// Number of keys currently waiting or being reconciled.
    pub async fn depth(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.in_flight.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains `queue` with `workers` concurrent reconcile loops until `shutdown`
/// fires.
pub async fn run_workers(
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    workers: usize,
    shutdown: CancellationToken,
) {
    let backoffs = Arc::new(Mutex::new(HashMap::new()));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let queue = queue.clone();
        let reconciler = Arc::clone(&reconciler);
        let backoffs = Arc::clone(&backoffs);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(worker_loop(
            worker, queue, reconciler, backoffs, shutdown,
        )));
    }

    for handle in handles {
        let _ = handle.await;
    }
    debug!("worker pool drained");
}

async fn worker_loop(
    worker: usize,
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    backoffs: Arc<Mutex<HashMap<ReconcileKey, BackoffState>>>,
    shutdown: CancellationToken,
) {
    debug!(worker, "reconcile worker started");
    loop {
        let key = tokio::select! {
            _ = shutdown.cancelled() => break,
            key = queue.next() => match key {
                Some(key) => key,
                None => break,
            },
        };

        let started = Instant::now();
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                // The pass is abandoned at an await point. Nothing needs
                // unwinding: a later run starts from a fresh read.
                debug!(worker, dummy = %key, "shutdown during reconcile");
                break;
            }
            result = reconciler.reconcile(&key) => result,
        };
        metrics::increment_reconciliations();
        metrics::observe_reconcile_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(Outcome::Done) => {
                backoffs.lock().await.remove(&key);
                queue.finish(&key).await;
            }
            Ok(Outcome::Requeue(delay)) => {
                backoffs.lock().await.remove(&key);
                queue.finish(&key).await;
                schedule_requeue(&queue, key, delay, &shutdown);
            }
            Err(err) if err.is_retryable() => {
                metrics::increment_reconciliation_errors();
                let delay = next_backoff_delay(&backoffs, &key).await;
                warn!(
                    worker,
                    dummy = %key,
                    error = %err,
                    delay_seconds = delay.as_secs(),
                    "reconcile failed, backing off"
                );
                queue.finish(&key).await;
                schedule_requeue(&queue, key, delay, &shutdown);
            }
            Err(err) => {
                metrics::increment_reconciliation_errors();
                error!(
                    worker,
                    dummy = %key,
                    error = %err,
                    "reconcile failed terminally, waiting for new events"
                );
                queue.finish(&key).await;
            }
        }
    }
    debug!(worker, "reconcile worker stopped");
}

async fn next_backoff_delay(
    backoffs: &Arc<Mutex<HashMap<ReconcileKey, BackoffState>>>,
    key: &ReconcileKey,
) -> Duration {
    let mut states = backoffs.lock().await;
    let state = states.entry(key.clone()).or_insert_with(BackoffState::new);
    state.increment_error();
    Duration::from_secs(state.backoff.next_backoff_seconds())
}

fn schedule_requeue(
    queue: &WorkQueue,
    key: ReconcileKey,
    delay: Duration,
    shutdown: &CancellationToken,
) {
    let queue = queue.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => queue.enqueue(key).await,
        }
    });
}
