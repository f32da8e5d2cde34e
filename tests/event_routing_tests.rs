//! # Event Routing Tests
//!
//! Tests for turning raw watch events into reconcile work.
//!
//! These tests verify:
//! - `Dummy` events always wake the reconciler for their own coordinates
//! - Pod events route to the controlling `Dummy`, even for renamed pods
//! - Unowned pod deletions wake the same-named `Dummy` for a possible rebuild
//! - Pods owned by other controllers never produce work

use dummy_operator::crd::Dummy;
use dummy_operator::state::ReconcileKey;
use dummy_operator::trigger::{dispatch_child_event, dispatch_parent_event, EventKind};
use k8s_openapi::api::core::v1::Pod;

fn dummy_from_manifest() -> Dummy {
    let yaml = r#"
apiVersion: interview.com/v1alpha1
kind: Dummy
metadata:
  name: dummy1
  namespace: default
spec:
  message: hello
"#;
    serde_yaml::from_str(yaml).expect("Should deserialize Dummy manifest")
}

fn pod_from_manifest(yaml: &str) -> Pod {
    serde_yaml::from_str(yaml).expect("Should deserialize Pod manifest")
}

const OWNED_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: dummy1
  namespace: default
  ownerReferences:
    - apiVersion: interview.com/v1alpha1
      kind: Dummy
      name: dummy1
      uid: 7a1c2f70-1111-2222-3333-444455556666
      controller: true
      blockOwnerDeletion: true
spec:
  containers:
    - name: nginx
      image: nginx
"#;

const RENAMED_OWNED_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: dummy1-copy
  namespace: default
  ownerReferences:
    - apiVersion: interview.com/v1alpha1
      kind: Dummy
      name: dummy1
      uid: 7a1c2f70-1111-2222-3333-444455556666
      controller: true
spec:
  containers:
    - name: nginx
      image: nginx
"#;

const UNOWNED_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: dummy1
  namespace: default
spec:
  containers:
    - name: nginx
      image: nginx
"#;

const REPLICASET_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: web-7f9c6
  namespace: default
  ownerReferences:
    - apiVersion: apps/v1
      kind: ReplicaSet
      name: web-7f9c
      uid: 99999999-8888-7777-6666-555544443333
      controller: true
spec:
  containers:
    - name: web
      image: nginx
"#;

#[test]
fn test_parent_events_route_to_own_coordinates() {
    let dummy = dummy_from_manifest();
    let expected = ReconcileKey::new("default", "dummy1");

    for kind in [EventKind::Apply, EventKind::Resync, EventKind::Delete] {
        assert_eq!(
            dispatch_parent_event(kind, &dummy),
            Some(expected.clone()),
            "Parent event {kind:?} should route to its own coordinates"
        );
    }
}

#[test]
fn test_owned_pod_routes_to_parent() {
    let pod = pod_from_manifest(OWNED_POD);
    let expected = ReconcileKey::new("default", "dummy1");

    for kind in [EventKind::Apply, EventKind::Resync, EventKind::Delete] {
        assert_eq!(
            dispatch_child_event(kind, &pod),
            Some(expected.clone()),
            "Owned pod event {kind:?} should route to the parent"
        );
    }
}

#[test]
fn test_renamed_owned_pod_still_routes_to_parent() {
    // The owner reference wins over the pod's own name.
    let pod = pod_from_manifest(RENAMED_OWNED_POD);

    assert_eq!(
        dispatch_child_event(EventKind::Apply, &pod),
        Some(ReconcileKey::new("default", "dummy1"))
    );
}

#[test]
fn test_unowned_pod_deletion_wakes_same_named_dummy() {
    // An unowned pod at the right coordinates blocks creation; once it goes
    // away, the engine gets a chance to build the real child.
    let pod = pod_from_manifest(UNOWNED_POD);

    assert_eq!(
        dispatch_child_event(EventKind::Delete, &pod),
        Some(ReconcileKey::new("default", "dummy1"))
    );
}

#[test]
fn test_unowned_pod_apply_is_ignored() {
    let pod = pod_from_manifest(UNOWNED_POD);

    assert_eq!(dispatch_child_event(EventKind::Apply, &pod), None);
    assert_eq!(dispatch_child_event(EventKind::Resync, &pod), None);
}

#[test]
fn test_foreign_controller_pod_apply_is_ignored() {
    let pod = pod_from_manifest(REPLICASET_POD);

    assert_eq!(dispatch_child_event(EventKind::Apply, &pod), None);
}

#[test]
fn test_foreign_controller_pod_deletion_routes_by_name() {
    // Deletion routing only needs coordinates. A Dummy named like this pod
    // would find nothing to do and converge in one cheap pass.
    let pod = pod_from_manifest(REPLICASET_POD);

    assert_eq!(
        dispatch_child_event(EventKind::Delete, &pod),
        Some(ReconcileKey::new("default", "web-7f9c6"))
    );
}
