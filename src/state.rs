//! # Cluster State Access
//!
//! Typed access to the `Dummy` and pod state the controller reads and writes.
//!
//! The reconciler only ever sees the [`ClusterState`] trait, so tests swap in
//! mocks or in-memory fakes without a running cluster, and the live
//! implementation stays a thin translation layer over [`kube::Api`].
//!
//! Every write carries the resource version of the copy it was computed from:
//! the API server rejects the patch with a conflict when another writer got
//! there first, instead of letting a stale pass clobber newer state.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::crd::Dummy;
use crate::error::Error;

/// Field manager recorded on every write this controller makes.
pub const FIELD_MANAGER: &str = "dummy-operator";

/// Namespace/name pair identifying the `Dummy` a piece of work belongs to.
///
/// The child pod shares its parent's coordinates, so one key addresses both
/// sides of a pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub namespace: String,
    pub name: String,
}

impl ReconcileKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of the object itself, when it carries both coordinates.
    #[must_use]
    pub fn for_object(meta: &ObjectMeta) -> Option<Self> {
        Some(Self {
            namespace: meta.namespace.clone()?,
            name: meta.name.clone()?,
        })
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Operations the reconciler needs against the cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Fetches the `Dummy` at `key`, or `None` when it does not exist.
    async fn get_dummy(&self, key: &ReconcileKey) -> Result<Option<Dummy>, Error>;

    /// Writes the finalizer list of `dummy` back to the API, preconditioned
    /// on the resource version `dummy` carries.
    async fn update_dummy_metadata(&self, dummy: &Dummy) -> Result<(), Error>;

    /// Replaces the status subresource of `dummy` and returns the refreshed
    /// object, so later writes in the same pass see the new resource version.
    async fn update_dummy_status(&self, dummy: &Dummy) -> Result<Dummy, Error>;

    /// Fetches the pod sharing coordinates with `key`, or `None`.
    async fn get_pod(&self, key: &ReconcileKey) -> Result<Option<Pod>, Error>;

    /// Creates `pod`. An existing pod at the same coordinates surfaces as a
    /// conflict.
    async fn create_pod(&self, pod: &Pod) -> Result<(), Error>;

    /// Patches the container list of `pod`, preconditioned on its resource
    /// version.
    async fn update_pod(&self, pod: &Pod) -> Result<(), Error>;

    /// Deletes the pod at `key`. A target that is already gone surfaces as
    /// an error classified by [`Error::is_not_found`]; callers decide
    /// whether that counts against them.
    async fn delete_pod(&self, key: &ReconcileKey) -> Result<(), Error>;
}

/// Live [`ClusterState`] backed by a [`kube::Client`].
#[derive(Clone)]
pub struct KubeClusterState {
    client: Client,
}

impl fmt::Debug for KubeClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterState").finish_non_exhaustive()
    }
}

impl KubeClusterState {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dummies(&self, namespace: &str) -> Api<Dummy> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn get_dummy(&self, key: &ReconcileKey) -> Result<Option<Dummy>, Error> {
        match self.dummies(&key.namespace).get(&key.name).await {
            Ok(dummy) => Ok(Some(dummy)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_dummy_metadata(&self, dummy: &Dummy) -> Result<(), Error> {
        let key = object_key(&dummy.metadata)?;
        let resource_version = required_resource_version(&dummy.metadata)?;
        self.dummies(&key.namespace)
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(json!({
                    "metadata": {
                        "resourceVersion": resource_version,
                        "finalizers": dummy.metadata.finalizers,
                    }
                })),
            )
            .await?;
        Ok(())
    }

    async fn update_dummy_status(&self, dummy: &Dummy) -> Result<Dummy, Error> {
        let key = object_key(&dummy.metadata)?;
        let resource_version = required_resource_version(&dummy.metadata)?;
        let status = dummy
            .status
            .as_ref()
            .ok_or(Error::MissingObjectKey { field: "status" })?;
        let updated = self
            .dummies(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(json!({
                    "metadata": { "resourceVersion": resource_version },
                    "status": status,
                })),
            )
            .await?;
        Ok(updated)
    }

    async fn get_pod(&self, key: &ReconcileKey) -> Result<Option<Pod>, Error> {
        match self.pods(&key.namespace).get(&key.name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), Error> {
        let key = object_key(&pod.metadata)?;
        self.pods(&key.namespace)
            .create(&PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn update_pod(&self, pod: &Pod) -> Result<(), Error> {
        let key = object_key(&pod.metadata)?;
        let resource_version = required_resource_version(&pod.metadata)?;
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| &spec.containers)
            .ok_or(Error::MissingObjectKey {
                field: "spec.containers",
            })?;
        self.pods(&key.namespace)
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(json!({
                    "metadata": { "resourceVersion": resource_version },
                    "spec": { "containers": containers },
                })),
            )
            .await?;
        Ok(())
    }

    async fn delete_pod(&self, key: &ReconcileKey) -> Result<(), Error> {
        self.pods(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

fn object_key(meta: &ObjectMeta) -> Result<ReconcileKey, Error> {
    ReconcileKey::for_object(meta).ok_or(Error::MissingObjectKey {
        field: "metadata.name or metadata.namespace",
    })
}

fn required_resource_version(meta: &ObjectMeta) -> Result<&str, Error> {
    meta.resource_version
        .as_deref()
        .ok_or(Error::MissingObjectKey {
            field: "metadata.resourceVersion",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_is_namespace_slash_name() {
        let key = ReconcileKey::new("default", "dummy1");
        assert_eq!(key.to_string(), "default/dummy1");
    }

    #[test]
    fn test_key_for_object_needs_both_coordinates() {
        let mut meta = ObjectMeta {
            name: Some("dummy1".to_string()),
            namespace: Some("default".to_string()),
            ..ObjectMeta::default()
        };
        assert_eq!(
            ReconcileKey::for_object(&meta),
            Some(ReconcileKey::new("default", "dummy1"))
        );

        meta.namespace = None;
        assert_eq!(ReconcileKey::for_object(&meta), None);

        meta.namespace = Some("default".to_string());
        meta.name = None;
        assert_eq!(ReconcileKey::for_object(&meta), None);
    }

    #[test]
    fn test_keys_hash_by_value() {
        let mut keys = std::collections::HashSet::new();
        keys.insert(ReconcileKey::new("default", "dummy1"));
        assert!(!keys.insert(ReconcileKey::new("default", "dummy1")));
        assert!(keys.insert(ReconcileKey::new("other", "dummy1")));
    }

    #[test]
    fn test_required_resource_version_missing() {
        let meta = ObjectMeta::default();
        assert!(required_resource_version(&meta).is_err());
    }
}
