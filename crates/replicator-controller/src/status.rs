//! ReplicaSet status calculation
//!
//! [`compute`] is a pure function of the ReplicaSet, the pods claimed in this
//! pass, the pass's manage error and the previous status. It builds a new
//! status value and never touches the cached object.
//!
//! The `ReplicaFailure` condition is a sticky flag: it is added by the first
//! pass that fails to create or delete, kept while failures continue, and
//! removed by the first clean pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetCondition, ReplicaSetStatus};
use k8s_openapi::api::core::v1::Pod;

use replicator_common::pod::is_ready;
use replicator_common::{
    Error, REASON_FAILED_CREATE, REASON_FAILED_DELETE, REPLICA_FAILURE_CONDITION,
};

use crate::diff::desired_replicas;

/// Condition of the given type, if present
pub fn get_condition<'a>(
    status: &'a ReplicaSetStatus,
    condition_type: &str,
) -> Option<&'a ReplicaSetCondition> {
    status
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == condition_type)
}

fn template_labels(rs: &ReplicaSet) -> BTreeMap<String, String> {
    rs.spec
        .as_ref()
        .and_then(|s| s.template.as_ref())
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

/// Every template label is present on the pod with the same value
fn is_fully_labeled(pod: &Pod, template: &BTreeMap<String, String>) -> bool {
    let labels = pod.metadata.labels.as_ref();
    template
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn failure_condition(desired: usize, claimed: usize, err: &Error) -> ReplicaSetCondition {
    let reason = if desired > claimed {
        Some(REASON_FAILED_CREATE.to_string())
    } else if desired < claimed {
        Some(REASON_FAILED_DELETE.to_string())
    } else {
        None
    };

    ReplicaSetCondition {
        type_: REPLICA_FAILURE_CONDITION.to_string(),
        status: "False".to_string(),
        reason,
        message: Some(err.to_string()),
        last_transition_time: None,
    }
}

/// Compute the status to persist after a pass
///
/// Counts come from `claimed_active`; `availableReplicas` mirrors
/// `readyReplicas` since minimum-ready-time is not tracked. Fields not
/// computed here, such as `observedGeneration`, are carried over from
/// `previous`.
pub fn compute(
    rs: &ReplicaSet,
    claimed_active: &[Arc<Pod>],
    manage_error: Option<&Error>,
    previous: &ReplicaSetStatus,
) -> ReplicaSetStatus {
    let template = template_labels(rs);
    let fully_labeled = claimed_active
        .iter()
        .filter(|p| is_fully_labeled(p, &template))
        .count();
    let ready = claimed_active.iter().filter(|p| is_ready(p)).count();

    let mut status = previous.clone();
    let has_failure = get_condition(previous, REPLICA_FAILURE_CONDITION).is_some();
    match manage_error {
        Some(err) if !has_failure => {
            let condition =
                failure_condition(desired_replicas(rs), claimed_active.len(), err);
            status
                .conditions
                .get_or_insert_with(Vec::new)
                .push(condition);
        }
        None if has_failure => {
            if let Some(conditions) = status.conditions.as_mut() {
                conditions.retain(|c| c.type_ != REPLICA_FAILURE_CONDITION);
            }
        }
        _ => {}
    }

    status.replicas = count(claimed_active.len());
    status.fully_labeled_replicas = Some(count(fully_labeled));
    status.ready_replicas = Some(count(ready));
    status.available_replicas = Some(count(ready));
    status
}
