//! Mutating calls against the API server
//!
//! These are the only suspension points of a reconcile pass. None of them is
//! retried here: a failure is reported to the reconciler, which records it and
//! leaves retry to the controller's work queue.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use replicator_common::{Error, Operation};

/// Trait abstracting Kubernetes client operations for the ReplicaSet reconciler
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplicaSetKubeClient: Send + Sync {
    /// Create a pod, returning the object the API server stored
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error>;

    /// Delete a pod; an already-deleted pod is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Apply a merge patch rewriting a pod's owner references
    async fn patch_pod_owners(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Replace the status subresource with `replica_set.status`
    ///
    /// The object carries the cached `resourceVersion`, so a concurrent
    /// writer makes this fail with a conflict.
    async fn replace_status(&self, replica_set: &ReplicaSet) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ReplicaSetKubeClientImpl {
    client: Client,
}

impl ReplicaSetKubeClientImpl {
    /// Create a new ReplicaSetKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplicaSetKubeClient for ReplicaSetKubeClientImpl {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let object = format!(
            "{}/{}*",
            namespace,
            pod.metadata.generate_name.as_deref().unwrap_or_default()
        );
        api.create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::from_kube(Operation::CreatePod, object, e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let result = api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::from_kube(Operation::DeletePod, format!("{}/{}", namespace, name), e)
            });
        match result {
            Err(e) if e.is_not_found() => {
                debug!(pod = %name, namespace = %namespace, "Pod already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn patch_pod_owners(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::from_kube(
                    Operation::PatchPodOwners,
                    format!("{}/{}", namespace, name),
                    e,
                )
            })
    }

    async fn replace_status(&self, replica_set: &ReplicaSet) -> Result<(), Error> {
        let namespace = replica_set.metadata.namespace.as_deref().ok_or_else(|| {
            Error::malformed_in("replace-status", "ReplicaSet has no namespace")
        })?;
        let name = replica_set
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::malformed_in("replace-status", "ReplicaSet has no name"))?;

        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let data = serde_json::to_vec(replica_set)?;
        api.replace_status(name, &PostParams::default(), data)
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::from_kube(
                    Operation::ReplaceStatus,
                    format!("{}/{}", namespace, name),
                    e,
                )
            })
    }
}
