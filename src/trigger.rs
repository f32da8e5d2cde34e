//! # Watch Event Routing
//!
//! Translates raw watch events on the `Dummy` and pod streams into reconcile
//! keys for the work queue.
//!
//! Parents always wake their own key. Pods route through their controlling
//! owner when they have one, and fall back to their own coordinates only for
//! deletions. That fallback is what lets the controller notice an unlinked
//! pod disappearing out from under a parent that still expects a child, while
//! create and update chatter from pods nobody owns stays out of the queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::{watcher, WatchStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crd::{controlling_dummy_ref, Dummy};
use crate::queue::WorkQueue;
use crate::state::ReconcileKey;

/// What a watch event says about an object, reduced to what routing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The object was created or modified.
    Apply,
    /// The object was reported while a watch (re)listed existing state.
    Resync,
    /// The object is gone.
    Delete,
}

/// Routes a `Dummy` event. Every kind wakes the parent's own key.
#[must_use]
pub fn dispatch_parent_event(kind: EventKind, dummy: &Dummy) -> Option<ReconcileKey> {
    let key = ReconcileKey::for_object(&dummy.metadata)?;
    match kind {
        EventKind::Apply | EventKind::Resync | EventKind::Delete => Some(key),
    }
}

/// Routes a pod event.
///
/// A pod controlled by a `Dummy` forwards every event to the owner's key. A
/// pod without that linkage only matters once it disappears, at which point
/// its own coordinates name the `Dummy` whose child vanished.
#[must_use]
pub fn dispatch_child_event(kind: EventKind, pod: &Pod) -> Option<ReconcileKey> {
    let key = ReconcileKey::for_object(&pod.metadata)?;
    match (controlling_dummy_ref(pod), kind) {
        (Some(owner), _) => Some(ReconcileKey::new(key.namespace, owner.name.clone())),
        (None, EventKind::Delete) => Some(key),
        (None, EventKind::Apply | EventKind::Resync) => None,
    }
}

/// Flips the shared readiness flag once every tracked stream has finished its
/// initial listing.
#[derive(Debug)]
pub struct ReadyGate {
    pending: AtomicUsize,
    ready: Arc<AtomicBool>,
}

impl ReadyGate {
    #[must_use]
    pub fn new(streams: usize, ready: Arc<AtomicBool>) -> Arc<Self> {
        if streams == 0 {
            ready.store(true, Ordering::SeqCst);
        }
        Arc::new(Self {
            pending: AtomicUsize::new(streams),
            ready,
        })
    }

    /// Marks one stream as synced. Called at most once per stream.
    pub fn stream_synced(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.ready.store(true, Ordering::SeqCst);
        }
    }
}

/// Follows the `Dummy` stream and feeds the queue until cancelled.
pub async fn watch_dummies(
    api: Api<Dummy>,
    queue: WorkQueue,
    gate: Arc<ReadyGate>,
    shutdown: CancellationToken,
) {
    drain_watch(api, queue, gate, shutdown, "dummies", dispatch_parent_event).await;
}

/// Follows the pod stream and feeds the queue until cancelled.
pub async fn watch_pods(
    api: Api<Pod>,
    queue: WorkQueue,
    gate: Arc<ReadyGate>,
    shutdown: CancellationToken,
) {
    drain_watch(api, queue, gate, shutdown, "pods", dispatch_child_event).await;
}

/// Consumes one watch stream, routing every event through `dispatch`.
///
/// Watch errors are logged and absorbed; the stream re-establishes itself
/// with backoff and replays current state through `Resync` events. The gate
/// hears about the first completed listing only, not about later replays.
async fn drain_watch<K>(
    api: Api<K>,
    queue: WorkQueue,
    gate: Arc<ReadyGate>,
    shutdown: CancellationToken,
    feed: &'static str,
    dispatch: impl Fn(EventKind, &K) -> Option<ReconcileKey>,
) where
    K: kube::Resource
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + 'static,
{
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    pin_mut!(stream);
    let mut synced = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(feed, "watch stopping");
                return;
            }
            event = stream.next() => match event {
                Some(Ok(watcher::Event::Apply(object))) => {
                    enqueue(dispatch(EventKind::Apply, &object), &queue).await;
                }
                Some(Ok(watcher::Event::Delete(object))) => {
                    enqueue(dispatch(EventKind::Delete, &object), &queue).await;
                }
                Some(Ok(watcher::Event::InitApply(object))) => {
                    enqueue(dispatch(EventKind::Resync, &object), &queue).await;
                }
                Some(Ok(watcher::Event::Init)) => {}
                Some(Ok(watcher::Event::InitDone)) => {
                    if !synced {
                        synced = true;
                        gate.stream_synced();
                    }
                }
                Some(Err(err)) => {
                    warn!(feed, error = %err, "watch hiccup, stream will back off");
                }
                None => {
                    warn!(feed, "watch stream ended");
                    return;
                }
            },
        }
    }
}

async fn enqueue(key: Option<ReconcileKey>, queue: &WorkQueue) {
    if let Some(key) = key {
        queue.enqueue(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{canonical_pod, DummySpec};

    fn sample_dummy(name: &str, namespace: &str) -> Dummy {
        let mut dummy = Dummy::new(
            name,
            DummySpec {
                message: "hello".to_string(),
            },
        );
        dummy.metadata.namespace = Some(namespace.to_string());
        dummy.metadata.uid = Some("uid-1234".to_string());
        dummy
    }

    fn owned_pod(name: &str, namespace: &str) -> Pod {
        canonical_pod(&sample_dummy(name, namespace)).unwrap()
    }

    fn unowned_pod(name: &str, namespace: &str) -> Pod {
        let mut pod = owned_pod(name, namespace);
        pod.metadata.owner_references = None;
        pod
    }

    mod parent_routing {
        use super::*;

        #[test]
        fn every_event_kind_wakes_the_parent_key() {
            let dummy = sample_dummy("dummy1", "default");
            for kind in [EventKind::Apply, EventKind::Resync, EventKind::Delete] {
                assert_eq!(
                    dispatch_parent_event(kind, &dummy),
                    Some(ReconcileKey::new("default", "dummy1"))
                );
            }
        }

        #[test]
        fn parent_without_coordinates_is_dropped() {
            let mut dummy = sample_dummy("dummy1", "default");
            dummy.metadata.namespace = None;
            assert_eq!(dispatch_parent_event(EventKind::Apply, &dummy), None);
        }
    }

    mod child_routing {
        use super::*;

        #[test]
        fn owned_pod_routes_every_event_to_its_owner() {
            let mut pod = owned_pod("dummy1", "default");
            // The pod's own name is irrelevant once an owner is declared.
            pod.metadata.name = Some("renamed-by-hand".to_string());
            for kind in [EventKind::Apply, EventKind::Resync, EventKind::Delete] {
                assert_eq!(
                    dispatch_child_event(kind, &pod),
                    Some(ReconcileKey::new("default", "dummy1"))
                );
            }
        }

        #[test]
        fn unowned_pod_only_matters_when_it_disappears() {
            let pod = unowned_pod("dummy1", "default");
            assert_eq!(dispatch_child_event(EventKind::Apply, &pod), None);
            assert_eq!(dispatch_child_event(EventKind::Resync, &pod), None);
            assert_eq!(
                dispatch_child_event(EventKind::Delete, &pod),
                Some(ReconcileKey::new("default", "dummy1"))
            );
        }

        #[test]
        fn non_controller_owner_counts_as_unowned() {
            let mut pod = owned_pod("dummy1", "default");
            if let Some(owners) = pod.metadata.owner_references.as_mut() {
                owners[0].controller = Some(false);
            }
            assert_eq!(dispatch_child_event(EventKind::Apply, &pod), None);
        }

        #[test]
        fn pod_without_coordinates_is_dropped() {
            let mut pod = unowned_pod("dummy1", "default");
            pod.metadata.name = None;
            assert_eq!(dispatch_child_event(EventKind::Delete, &pod), None);
        }
    }

    mod ready_gate {
        use super::*;

        #[test]
        fn flips_only_after_every_stream_synced() {
            let ready = Arc::new(AtomicBool::new(false));
            let gate = ReadyGate::new(2, Arc::clone(&ready));

            gate.stream_synced();
            assert!(!ready.load(Ordering::SeqCst));

            gate.stream_synced();
            assert!(ready.load(Ordering::SeqCst));
        }

        #[test]
        fn zero_streams_is_ready_immediately() {
            let ready = Arc::new(AtomicBool::new(false));
            let _gate = ReadyGate::new(0, Arc::clone(&ready));
            assert!(ready.load(Ordering::SeqCst));
        }
    }
}
