//! # Dummy Custom Resource
//!
//! The `Dummy` custom resource (`interview.com/v1alpha1`) and the canonical
//! shape of the child pod every `Dummy` owns.
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: interview.com/v1alpha1
//! kind: Dummy
//! metadata:
//!   name: dummy1
//!   namespace: default
//! spec:
//!   message: "I'm just a dummy"
//! ```
//!
//! The controller mirrors `spec.message` into `status.specEcho` and keeps a
//! single nginx pod alive under the same name and namespace as the parent.

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Finalizer token held on a `Dummy` while the controller still owes it
/// child-pod cleanup.
pub const DUMMY_FINALIZER: &str = "interview.com/finalizer";

/// Container name inside the managed child pod.
pub const CHILD_CONTAINER_NAME: &str = "nginx";

/// Image the managed child pod must run.
pub const CHILD_IMAGE: &str = "nginx";

/// Dummy Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Dummy",
    group = "interview.com",
    version = "v1alpha1",
    namespaced,
    status = "DummyStatus",
    shortname = "dm",
    printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".spec.message"}"#,
    printcolumn = r#"{"name":"Echo", "type":"string", "jsonPath":".status.specEcho"}"#,
    printcolumn = r#"{"name":"Pod Status", "type":"string", "jsonPath":".status.podStatus"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DummySpec {
    /// Free-form message the controller copies into `status.specEcho`.
    pub message: String,
}

/// Controller-written view of the parent and its child pod.
///
/// Fields serialize only when set: an absent field in a merge patch leaves the
/// server-side value untouched, where an explicit `null` would clear it.
#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DummyStatus {
    /// Copy of `spec.message` from the most recent pass over the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_echo: Option<String>,
    /// Phase of the child pod as last observed (`Pending`, `Running`, ...).
    /// Written as an empty string while the pod exists but has not reported
    /// a phase yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_status: Option<String>,
}

impl Dummy {
    /// True once the API server has begun deleting this object.
    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True while the controller's finalizer token is present.
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|tokens| tokens.iter().any(|t| t == DUMMY_FINALIZER))
    }
}

/// Builds the child pod a `Dummy` must own: same name and namespace as the
/// parent, one nginx container, and a controller owner reference pointing
/// back at the parent.
///
/// # Errors
///
/// Fails when the parent carries no `uid` yet, since a child created without
/// the owner linkage would never route its events back to the parent.
pub fn canonical_pod(dummy: &Dummy) -> Result<Pod, Error> {
    let name = dummy.metadata.name.clone().ok_or(Error::MissingObjectKey {
        field: "metadata.name",
    })?;
    let namespace = dummy
        .metadata
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey {
            field: "metadata.namespace",
        })?;
    let owner = dummy
        .controller_owner_ref(&())
        .ok_or_else(|| Error::owner_linkage(format!("Dummy {namespace}/{name} has no uid")))?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CHILD_CONTAINER_NAME.to_string(),
                image: Some(CHILD_IMAGE.to_string()),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        ..Pod::default()
    })
}

/// Returns the owner reference through which a `Dummy` controls this pod, if
/// one exists.
#[must_use]
pub fn controlling_dummy_ref(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata.owner_references.as_ref()?.iter().find(|r| {
        r.controller.unwrap_or(false)
            && r.kind == Dummy::kind(&()).as_ref()
            && r.api_version == Dummy::api_version(&()).as_ref()
    })
}

/// Phase reported by the kubelet for this pod, when one has been recorded.
#[must_use]
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}
