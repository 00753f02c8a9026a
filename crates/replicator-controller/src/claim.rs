//! Pod claiming: adopt, release, orphan or ignore
//!
//! Every candidate pod is decided on its own from the current cache contents.
//! Decisions never wait for the adopt/release patches they produce: membership
//! of this pass follows the decision, and the next pass starts again from
//! whatever the cache then says. Two ReplicaSets racing for the same pod are
//! settled by the API server rejecting the stale patch (the patch carries the
//! pod's `uid` and `resourceVersion`).

use std::sync::Arc;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde_json::json;
use tracing::info;

use replicator_common::ownership::{controller_ref, controller_reference_for};
use replicator_common::pod::is_terminating;
use replicator_common::{Error, Selector};

/// Outcome of the claim rules for one pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Controlled by something else
    OwnedElsewhere,
    /// Ours and still selected
    AlreadyClaimed,
    /// Ours but no longer selected; left alone while the ReplicaSet is being deleted
    KeptDuringTeardown,
    /// Ours but no longer selected: drop our controller reference
    Release,
    /// Unowned, but the ReplicaSet is being deleted
    NoAdoptionDuringTeardown,
    /// Unowned and not selected
    LabelMismatch,
    /// Unowned and selected, but the pod is being deleted
    PodTerminating,
    /// Unowned and selected: attach our controller reference
    Adopt,
}

impl ClaimDecision {
    /// Whether the pod counts toward this ReplicaSet in the current pass
    pub fn is_claimed(self) -> bool {
        matches!(self, ClaimDecision::AlreadyClaimed | ClaimDecision::Adopt)
    }
}

/// Apply the claim rules to a single pod
///
/// `rs_uid` is the uid of the claiming ReplicaSet and `rs_terminating` whether
/// its deletion has been requested.
pub fn decide(
    rs_uid: &str,
    rs_terminating: bool,
    selector: &Selector,
    pod: &Pod,
) -> ClaimDecision {
    let selected = selector.matches_opt(pod.metadata.labels.as_ref());

    match controller_ref(pod) {
        Some(owner) if owner.uid != rs_uid => ClaimDecision::OwnedElsewhere,
        Some(_) if selected => ClaimDecision::AlreadyClaimed,
        Some(_) if rs_terminating => ClaimDecision::KeptDuringTeardown,
        Some(_) => ClaimDecision::Release,
        None if rs_terminating => ClaimDecision::NoAdoptionDuringTeardown,
        None if !selected => ClaimDecision::LabelMismatch,
        None if is_terminating(pod) => ClaimDecision::PodTerminating,
        None => ClaimDecision::Adopt,
    }
}

/// Ownership change requested by a claim decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimKind {
    /// Attach the ReplicaSet's controller reference
    Adopt,
    /// Strip the ReplicaSet's controller reference
    Release,
}

/// Best-effort owner-reference patch for one pod
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimMutation {
    /// Adopt or release
    pub kind: ClaimKind,
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// JSON merge patch to send
    pub patch: serde_json::Value,
}

impl ClaimMutation {
    fn new(kind: ClaimKind, pod: &Pod, owner_references: Vec<OwnerReference>) -> Self {
        let mut metadata = json!({ "ownerReferences": owner_references });
        if let Some(uid) = &pod.metadata.uid {
            metadata["uid"] = json!(uid);
        }
        if let Some(rv) = &pod.metadata.resource_version {
            metadata["resourceVersion"] = json!(rv);
        }

        Self {
            kind,
            namespace: pod.namespace().unwrap_or_default(),
            pod: pod.name_any(),
            patch: json!({ "metadata": metadata }),
        }
    }

    /// Append `owner` to the pod's existing owner references
    pub fn adopt(pod: &Pod, owner: &OwnerReference) -> Self {
        let mut refs = pod.metadata.owner_references.clone().unwrap_or_default();
        refs.push(owner.clone());
        Self::new(ClaimKind::Adopt, pod, refs)
    }

    /// Drop every owner reference with `owner_uid` from the pod
    pub fn release(pod: &Pod, owner_uid: &str) -> Self {
        let refs = pod
            .metadata
            .owner_references
            .iter()
            .flatten()
            .filter(|o| o.uid != owner_uid)
            .cloned()
            .collect();
        Self::new(ClaimKind::Release, pod, refs)
    }
}

/// Result of claiming a candidate list
#[derive(Clone, Debug, Default)]
pub struct ClaimOutcome {
    /// Pods counted for this ReplicaSet, in candidate order
    pub claimed: Vec<Arc<Pod>>,
    /// Owner-reference patches to issue
    pub mutations: Vec<ClaimMutation>,
}

/// Claim the candidates for a ReplicaSet
///
/// Fails only when the ReplicaSet has no name or uid.
pub fn claim(
    rs: &ReplicaSet,
    selector: &Selector,
    candidates: &[Arc<Pod>],
) -> Result<ClaimOutcome, Error> {
    let owner = controller_reference_for(rs)?;
    let rs_terminating = rs.metadata.deletion_timestamp.is_some();
    let rs_key = format!("{}/{}", rs.namespace().unwrap_or_default(), owner.name);

    let mut outcome = ClaimOutcome::default();
    for pod in candidates {
        let decision = decide(&owner.uid, rs_terminating, selector, pod);
        match decision {
            ClaimDecision::Adopt => {
                info!(replica_set = %rs_key, pod = %pod.name_any(), "Adopting pod");
                outcome.mutations.push(ClaimMutation::adopt(pod, &owner));
            }
            ClaimDecision::Release => {
                info!(replica_set = %rs_key, pod = %pod.name_any(), "Releasing pod");
                outcome
                    .mutations
                    .push(ClaimMutation::release(pod, &owner.uid));
            }
            _ => {}
        }
        if decision.is_claimed() {
            outcome.claimed.push(pod.clone());
        }
    }

    Ok(outcome)
}
