//! Read-only views of the informer caches
//!
//! The reconciler never talks to the API server to read state: it reads a
//! [`CacheSnapshot`] fed by kube-rs reflectors, and only the mutating calls in
//! [`crate::client`] go over the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use tracing::{debug, warn};

/// Trait abstracting the local object caches
///
/// Implementations must be cheap and non-blocking: they are called on every
/// reconcile pass, from several workers at once.
pub trait CacheSnapshot: Send + Sync {
    /// Cached ReplicaSet by key, `None` once it has been deleted
    fn get_replica_set(&self, namespace: &str, name: &str) -> Option<Arc<ReplicaSet>>;

    /// Cached pods of a namespace, ordered by ascending name
    ///
    /// The order is part of the contract: surplus pods are deleted from the
    /// front of this list.
    fn list_pods(&self, namespace: &str) -> Vec<Arc<Pod>>;
}

/// Sort pods by name, the iteration order every cache exposes
pub fn sort_by_name(pods: &mut [Arc<Pod>]) {
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
}

/// Cache backed by kube-rs reflector stores
#[derive(Clone)]
pub struct ReflectorCache {
    replica_sets: Store<ReplicaSet>,
    pods: Store<Pod>,
}

impl ReflectorCache {
    /// Wrap the ReplicaSet and Pod reflector stores
    pub fn new(replica_sets: Store<ReplicaSet>, pods: Store<Pod>) -> Self {
        Self { replica_sets, pods }
    }
}

impl CacheSnapshot for ReflectorCache {
    fn get_replica_set(&self, namespace: &str, name: &str) -> Option<Arc<ReplicaSet>> {
        self.replica_sets
            .get(&ObjectRef::new(name).within(namespace))
    }

    fn list_pods(&self, namespace: &str) -> Vec<Arc<Pod>> {
        let mut pods: Vec<Arc<Pod>> = self
            .pods
            .state()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .collect();
        sort_by_name(&mut pods);
        pods
    }
}

/// "Initial list complete" flag of one cache
#[derive(Clone, Debug, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
    /// Whether the cache has completed its initial list
    pub fn has_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Record that the initial list completed
    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Flip `flag` once `store` has seen its first full list
///
/// Runs until the store is ready or its writer is dropped.
pub async fn mark_synced_when_ready<K>(store: Store<K>, flag: SyncFlag, cache: &'static str)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + std::hash::Hash + Clone,
{
    match store.wait_until_ready().await {
        Ok(()) => {
            debug!(cache, "Cache synced");
            flag.mark_synced();
        }
        Err(e) => warn!(cache, error = %e, "Cache writer dropped before initial sync"),
    }
}
