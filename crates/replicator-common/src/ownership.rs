//! Controller owner references
//!
//! A pod has at most one owner reference with `controller: true`. The
//! replicator only manages pods whose controller is an `apps/v1 ReplicaSet`.

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::Resource as _;

use crate::Error;

fn is_controller(owner: &OwnerReference) -> bool {
    owner.controller == Some(true)
}

fn is_replica_set(owner: &OwnerReference) -> bool {
    owner.api_version == ReplicaSet::API_VERSION && owner.kind == ReplicaSet::KIND
}

/// First controller reference of a pod pointing at a ReplicaSet
pub fn controller_owner_of(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| is_controller(o) && is_replica_set(o))
}

/// First controller reference of a pod, whatever kind the controller is
pub fn controller_ref(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| is_controller(o))
}

/// The controller owner reference a ReplicaSet puts on the pods it manages
pub fn controller_reference_for(rs: &ReplicaSet) -> Result<OwnerReference, Error> {
    let name = rs
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::malformed_in("ownership", "ReplicaSet has no name"))?;
    let uid = rs.metadata.uid.clone().ok_or_else(|| {
        Error::malformed_in("ownership", format!("ReplicaSet {} has no uid", name))
    })?;

    Ok(OwnerReference {
        api_version: ReplicaSet::API_VERSION.to_string(),
        kind: ReplicaSet::KIND.to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
