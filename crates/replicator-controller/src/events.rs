//! Watch event filtering and key mapping
//!
//! Pod events are turned into ReplicaSet keys here. The controller only ever
//! sees keys: what changed is re-read from the caches on the next pass.

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;

use replicator_common::ownership::controller_owner_of;
use replicator_common::Error;

use crate::cache::SyncFlag;
use crate::reconcile::ReconcileRequest;

/// A pod change as seen by the pod cache
#[derive(Clone, Debug, PartialEq)]
pub enum PodEvent {
    /// First sighting of a pod
    Added(Arc<Pod>),
    /// A known pod changed
    Updated {
        /// Cached state before the change
        old: Arc<Pod>,
        /// State after the change
        new: Arc<Pod>,
    },
    /// A pod went away
    Deleted {
        /// Last known state
        pod: Arc<Pod>,
        /// The delete was inferred from a relist, so `pod` may be stale
        final_state_unknown: bool,
    },
}

impl PodEvent {
    /// The most recent state the event carries
    pub fn pod(&self) -> &Arc<Pod> {
        match self {
            PodEvent::Added(pod) => pod,
            PodEvent::Updated { new, .. } => new,
            PodEvent::Deleted { pod, .. } => pod,
        }
    }
}

/// Any event the controller reacts to
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// A ReplicaSet was added, changed or deleted
    ReplicaSet(Arc<ReplicaSet>),
    /// A pod changed
    Pod(PodEvent),
}

// =============================================================================
// Filters and key mapping
// =============================================================================

/// Whether an event should trigger a reconcile at all
///
/// Pod adds and updates pass only when the pod has a ReplicaSet controller
/// owner. Deletes always pass: a vanished pod may need replacing.
pub fn admit(event: &WatchEvent) -> bool {
    match event {
        WatchEvent::ReplicaSet(_) => true,
        WatchEvent::Pod(PodEvent::Deleted { .. }) => true,
        WatchEvent::Pod(PodEvent::Added(pod)) => controller_owner_of(pod).is_some(),
        WatchEvent::Pod(PodEvent::Updated { new, .. }) => controller_owner_of(new).is_some(),
    }
}

/// Key to reconcile for an event
///
/// `Ok(None)` for a pod without a ReplicaSet controller owner. Objects with
/// no namespace or name are malformed.
pub fn request_for(event: &WatchEvent) -> Result<Option<ReconcileRequest>, Error> {
    match event {
        WatchEvent::ReplicaSet(rs) => ReconcileRequest::for_replica_set(rs).map(Some),
        WatchEvent::Pod(ev) => owner_request(ev.pod()),
    }
}

/// Key of the ReplicaSet controlling `pod`, if any
pub fn owner_request(pod: &Pod) -> Result<Option<ReconcileRequest>, Error> {
    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::malformed_in("event-mapper", "pod has no namespace"))?;
    if pod.metadata.name.is_none() {
        return Err(Error::malformed_in("event-mapper", "pod has no name"));
    }
    Ok(controller_owner_of(pod).map(|owner| ReconcileRequest::new(namespace, &owner.name)))
}

// =============================================================================
// Pod event classification
// =============================================================================

/// Turns raw pod watcher events into [`PodEvent`]s
///
/// Must see each event before the pod store applies it: whether an apply is
/// an add or an update depends on what the store held before.
#[derive(Debug, Default)]
pub struct PodEventClassifier {
    relisted: Option<HashSet<ObjectRef<Pod>>>,
}

impl PodEventClassifier {
    /// Create a classifier with no relist in progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `event` against the store's current contents
    ///
    /// A relist that completes without a pod the store still holds yields a
    /// delete with `final_state_unknown` set.
    pub fn classify(&mut self, store: &Store<Pod>, event: &watcher::Event<Pod>) -> Vec<PodEvent> {
        match event {
            watcher::Event::Apply(pod) => vec![applied(store, pod)],
            watcher::Event::Delete(pod) => vec![PodEvent::Deleted {
                pod: Arc::new(pod.clone()),
                final_state_unknown: false,
            }],
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(ObjectRef::from_obj(pod));
                }
                vec![applied(store, pod)]
            }
            watcher::Event::InitDone => {
                let seen = self.relisted.take().unwrap_or_default();
                store
                    .state()
                    .into_iter()
                    .filter(|pod| !seen.contains(&ObjectRef::from_obj(pod.as_ref())))
                    .map(|pod| PodEvent::Deleted {
                        pod,
                        final_state_unknown: true,
                    })
                    .collect()
            }
        }
    }
}

fn applied(store: &Store<Pod>, pod: &Pod) -> PodEvent {
    let new = Arc::new(pod.clone());
    match store.get(&ObjectRef::from_obj(pod)) {
        Some(old) => PodEvent::Updated { old, new },
        None => PodEvent::Added(new),
    }
}

// =============================================================================
// Readiness
// =============================================================================

/// Open once both caches have completed their initial list
#[derive(Clone, Debug, Default)]
pub struct ReadinessGate {
    /// ReplicaSet cache sync flag
    pub replica_sets: SyncFlag,
    /// Pod cache sync flag
    pub pods: SyncFlag,
}

impl ReadinessGate {
    /// Gate over the two cache flags
    pub fn new(replica_sets: SyncFlag, pods: SyncFlag) -> Self {
        Self { replica_sets, pods }
    }

    /// Whether reconciles may run
    pub fn is_ready(&self) -> bool {
        self.replica_sets.has_synced() && self.pods.has_synced()
    }
}
