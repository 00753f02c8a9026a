//! Replica count diff
//!
//! Scaling up creates a single pod per pass whatever the shortfall; the
//! create is observed through the pod watch and the follow-up pass creates
//! the next one. Scaling down deletes the whole surplus in one pass, taking
//! victims from the front of the claimed list (cache order, ascending name)
//! with no preference for unready pods.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;

/// Replica count assumed when `spec.replicas` is unset, as the API server defaults it
pub const DEFAULT_REPLICAS: i32 = 1;

/// Corrective action for one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaAction {
    /// Claimed count already matches
    None,
    /// Create exactly one pod
    CreateOne,
    /// Delete this many claimed pods
    Delete(usize),
}

/// Desired replica count of a ReplicaSet, never negative
pub fn desired_replicas(rs: &ReplicaSet) -> usize {
    let replicas = rs
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_REPLICAS);
    usize::try_from(replicas).unwrap_or(0)
}

/// Compare the desired count with the number of claimed active pods
pub fn diff(desired: usize, claimed_active: usize) -> ReplicaAction {
    if claimed_active < desired {
        ReplicaAction::CreateOne
    } else if claimed_active > desired {
        ReplicaAction::Delete(claimed_active - desired)
    } else {
        ReplicaAction::None
    }
}

/// The `count` pods to delete, taken from the front of the claimed list
pub fn deletion_victims(claimed: &[Arc<Pod>], count: usize) -> &[Arc<Pod>] {
    &claimed[..count.min(claimed.len())]
}
