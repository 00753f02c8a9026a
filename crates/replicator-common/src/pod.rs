//! Pod classification: phase, active, ready

use std::fmt;

use k8s_openapi::api::core::v1::Pod;

/// Pod condition type reporting readiness
pub const READY_CONDITION: &str = "Ready";

/// Lifecycle phase of a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PodPhase {
    /// Accepted, containers not all running yet
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one failed
    Failed,
    /// Phase missing or not recognised
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Succeeded or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Phase of a pod
pub fn phase(pod: &Pod) -> PodPhase {
    PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
}

/// Deletion has been requested (deletionTimestamp set)
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Counts toward the replica total: not in a terminal phase and not being deleted
pub fn is_active(pod: &Pod) -> bool {
    !phase(pod).is_terminal() && !is_terminating(pod)
}

/// Has a `Ready` condition with status `True`
pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == READY_CONDITION))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}
