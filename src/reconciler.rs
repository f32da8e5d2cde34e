//! # Reconciliation Engine
//!
//! Drives a `Dummy` and its child pod toward the declared state. Every pass
//! re-reads the world through [`ClusterState`] and decides from scratch, so a
//! pass can be repeated, dropped, or run after a missed event without
//! corrupting anything.
//!
//! A pass lands in one of three cases:
//!
//! - the parent is gone: any pod still standing at the same coordinates is
//!   swept directly,
//! - the parent is being deleted: the child is cleaned up and the finalizer
//!   released,
//! - otherwise: the message is echoed into status, the child pod is created
//!   or repaired, and ownership bookkeeping runs for the pairing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{
    canonical_pod, controlling_dummy_ref, pod_phase, Dummy, DummyStatus, CHILD_IMAGE,
    DUMMY_FINALIZER,
};
use crate::error::Error;
use crate::observability::metrics;
use crate::state::{ClusterState, ReconcileKey};

/// What the worker pool should do with a key after a pass completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; wait for the next event.
    Done,
    /// Converged for now, but look again after the given delay.
    Requeue(Duration),
}

/// Corrective actions for a child pod that no longer matches its canonical
/// shape or the parent's recorded view of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftAction {
    /// Mirror the observed pod phase into the parent status, empty when the
    /// pod has not reported one.
    RecordPhase(String),
    /// Patch the first container back to the managed image.
    RepairImage,
    /// Delete the pod so the next pass recreates it from scratch.
    Recreate,
}

/// Compares a child pod against its canonical shape and the parent's recorded
/// view of it. Rules are independent; every rule that matches contributes an
/// action to the same pass.
#[must_use]
pub fn assess_drift(dummy: &Dummy, pod: &Pod) -> Vec<DriftAction> {
    let mut actions = Vec::new();

    // The record mirrors the reported phase verbatim; a pod that has not
    // reported one yet reads as empty, which wipes a stale record from a
    // previous pod at the same coordinates.
    let observed = pod_phase(pod).unwrap_or_default();
    let recorded = dummy
        .status
        .as_ref()
        .and_then(|status| status.pod_status.as_deref())
        .unwrap_or_default();
    if observed != recorded {
        actions.push(DriftAction::RecordPhase(observed.to_string()));
    }

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    if let Some(first) = containers.first() {
        if first.image.as_deref() != Some(CHILD_IMAGE) {
            actions.push(DriftAction::RepairImage);
        }
    }
    // A pod with extra containers is not worth untangling in place. A pod
    // with none is malformed beyond our doing and left alone.
    if containers.len() > 1 {
        actions.push(DriftAction::Recreate);
    }

    actions
}

/// One-pass reconciler over a [`ClusterState`].
pub struct Reconciler {
    state: Arc<dyn ClusterState>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(state: Arc<dyn ClusterState>) -> Self {
        Self { state }
    }

    /// Runs one full pass for `key`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of a required step; the caller classifies it
    /// through [`Error::is_retryable`] and schedules accordingly.
    #[instrument(skip(self), fields(dummy = %key))]
    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<Outcome, Error> {
        match self.state.get_dummy(key).await? {
            None => self.sweep_orphaned_child(key).await,
            Some(dummy) if dummy.is_being_deleted() => self.finalize(key, dummy).await,
            Some(dummy) => self.apply(key, dummy).await,
        }
    }

    /// The parent does not exist at all, so any pod still standing at the
    /// same coordinates is deleted directly. Finalizer bookkeeping no longer
    /// applies once the parent cannot be read back.
    async fn sweep_orphaned_child(&self, key: &ReconcileKey) -> Result<Outcome, Error> {
        if self.state.get_pod(key).await?.is_some() {
            info!(dummy = %key, "parent is gone, sweeping leftover child pod");
            self.delete_child(key).await?;
        }
        Ok(Outcome::Done)
    }

    /// Deletes the child pod at `key`. A pod that is already gone counts as
    /// deleted; another actor claiming it first, the garbage collector
    /// included, leaves nothing for this pass to do. Returns whether the
    /// delete actually removed one.
    async fn delete_child(&self, key: &ReconcileKey) -> Result<bool, Error> {
        match self.state.delete_pod(key).await {
            Ok(()) => {
                metrics::increment_child_pods_deleted();
                Ok(true)
            }
            Err(err) if err.is_not_found() => {
                debug!(dummy = %key, "child pod was already gone");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// The parent is marked for deletion. While our finalizer token is still
    /// present the child pod is cleaned up first, then the token is released
    /// so the API server can finish the delete.
    async fn finalize(&self, key: &ReconcileKey, dummy: Dummy) -> Result<Outcome, Error> {
        if !dummy.has_finalizer() {
            debug!(dummy = %key, "deletion already handed back to the API server");
            return Ok(Outcome::Done);
        }

        // Cleanup is best effort: a child that refuses to die must not wedge
        // the parent's deletion behind the finalizer forever.
        if let Err(err) = self.delete_child(key).await {
            error!(
                dummy = %key,
                error = %err,
                "child pod cleanup failed, releasing finalizer anyway"
            );
            metrics::increment_reconciliation_errors();
        }

        self.release_finalizer(key, dummy).await?;
        Ok(Outcome::Done)
    }

    async fn release_finalizer(&self, key: &ReconcileKey, mut dummy: Dummy) -> Result<(), Error> {
        let tokens = dummy.metadata.finalizers.take().unwrap_or_default();
        let remaining: Vec<String> = tokens
            .into_iter()
            .filter(|token| token != DUMMY_FINALIZER)
            .collect();
        dummy.metadata.finalizers = Some(remaining);

        self.state.update_dummy_metadata(&dummy).await?;
        metrics::increment_finalizers_removed();
        info!(dummy = %key, "released finalizer");
        Ok(())
    }

    /// Normal convergence: echo the message first, then make the child pod
    /// real and canonical.
    async fn apply(&self, key: &ReconcileKey, dummy: Dummy) -> Result<Outcome, Error> {
        let dummy = self.echo_message(key, dummy).await?;

        match self.state.get_pod(key).await? {
            None => self.create_child(key, &dummy).await,
            Some(pod) => self.converge_child(key, dummy, pod).await,
        }
    }

    /// Mirrors `spec.message` into `status.specEcho`. Skipped when already
    /// current, so a pass over a converged parent makes no writes.
    async fn echo_message(&self, key: &ReconcileKey, mut dummy: Dummy) -> Result<Dummy, Error> {
        let message = dummy.spec.message.clone();
        let current = dummy
            .status
            .as_ref()
            .and_then(|status| status.spec_echo.as_deref());
        if current == Some(message.as_str()) {
            return Ok(dummy);
        }

        info!(dummy = %key, message = %message, "echoing message into status");
        dummy
            .status
            .get_or_insert_with(DummyStatus::default)
            .spec_echo = Some(message);
        self.state.update_dummy_status(&dummy).await
    }

    async fn create_child(&self, key: &ReconcileKey, dummy: &Dummy) -> Result<Outcome, Error> {
        let pod = canonical_pod(dummy)?;
        match self.state.create_pod(&pod).await {
            Ok(()) => {
                info!(dummy = %key, "created child pod");
                metrics::increment_child_pods_created();
                Ok(Outcome::Done)
            }
            Err(err) if err.is_conflict() => {
                // Someone created the pod between our read and our write. The
                // follow-up pass sees it and converges normally.
                debug!(dummy = %key, "child pod appeared concurrently");
                Ok(Outcome::Requeue(Duration::from_secs(1)))
            }
            Err(err) => Err(err),
        }
    }

    async fn converge_child(
        &self,
        key: &ReconcileKey,
        mut dummy: Dummy,
        pod: Pod,
    ) -> Result<Outcome, Error> {
        let mut child_present = true;
        for action in assess_drift(&dummy, &pod) {
            match action {
                DriftAction::RecordPhase(phase) => {
                    info!(dummy = %key, phase = %phase, "recording child pod phase");
                    dummy
                        .status
                        .get_or_insert_with(DummyStatus::default)
                        .pod_status = Some(phase);
                    dummy = self.state.update_dummy_status(&dummy).await?;
                }
                DriftAction::RepairImage => {
                    warn!(dummy = %key, "child pod image drifted, patching it back");
                    let mut repaired = pod.clone();
                    if let Some(first) = repaired
                        .spec
                        .as_mut()
                        .and_then(|spec| spec.containers.first_mut())
                    {
                        first.image = Some(CHILD_IMAGE.to_string());
                    }
                    self.state.update_pod(&repaired).await?;
                    metrics::increment_child_pods_patched();
                }
                DriftAction::Recreate => {
                    warn!(dummy = %key, "child pod shape is beyond repair, deleting it");
                    self.delete_child(key).await?;
                    child_present = false;
                }
            }
        }

        if child_present {
            self.ensure_ownership(key, dummy, &pod).await?;
        }
        Ok(Outcome::Done)
    }

    /// Keeps the parent deletable only through our cleanup when its child is
    /// not linked: garbage collection will never reap a pod without an owner
    /// reference, so the parent carries a finalizer instead.
    async fn ensure_ownership(
        &self,
        key: &ReconcileKey,
        mut dummy: Dummy,
        pod: &Pod,
    ) -> Result<(), Error> {
        if controlling_dummy_ref(pod).is_some() || dummy.has_finalizer() {
            return Ok(());
        }

        info!(dummy = %key, "adopting unlinked child pod behind a finalizer");
        dummy
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(DUMMY_FINALIZER.to_string());
        self.state.update_dummy_metadata(&dummy).await?;
        metrics::increment_finalizers_added();
        Ok(())
    }
}
