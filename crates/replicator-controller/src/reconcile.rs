//! ReplicaSet reconcile loop
//!
//! One pass per request, driven entirely from the caches:
//!
//! 1. Load the ReplicaSet; a cache miss means it was deleted and the pass ends.
//! 2. List the namespace's pods and keep the active ones.
//! 3. Claim, issuing adopt/release patches best-effort.
//! 4. Diff the desired count against the claimed pods and create or delete.
//! 5. Compute and persist status, recording any create/delete failure as the
//!    `ReplicaFailure` condition.
//!
//! Only a failed status write asks for an early requeue. Create and delete
//! failures are visible in status and retried on the next resync.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use replicator_common::pod::is_active;
use replicator_common::{Error, Selector};

use crate::cache::CacheSnapshot;
use crate::claim::{claim, ClaimMutation};
use crate::client::ReplicaSetKubeClient;
use crate::diff::{deletion_victims, desired_replicas, diff, ReplicaAction};
use crate::events::ReadinessGate;
use crate::status;
use crate::template::pod_from_template;

// =============================================================================
// Requests and results
// =============================================================================

/// Key of the ReplicaSet to reconcile
///
/// Carries no payload: every pass reads fresh state from the caches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    /// ReplicaSet namespace
    pub namespace: String,
    /// ReplicaSet name
    pub name: String,
}

impl ReconcileRequest {
    /// Request for the given namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Request keyed on a ReplicaSet's own namespace and name
    pub fn for_replica_set(rs: &ReplicaSet) -> Result<Self, Error> {
        let missing = |what: &str| {
            Error::malformed_in("replica-set-key", format!("ReplicaSet has no {}", what))
        };
        let namespace = rs
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| missing("namespace"))?;
        let name = rs.metadata.name.as_deref().ok_or_else(|| missing("name"))?;
        Ok(Self::new(namespace, name))
    }

    /// Controller object reference for this key
    pub fn object_ref(&self) -> ObjectRef<ReplicaSet> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How a pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The ReplicaSet is no longer cached
    Deleted,
    /// Status was written
    StatusPersisted,
    /// Status write failed
    StatusPersistFailed,
}

/// Result of one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Ask for an early retry instead of waiting for the next resync
    pub requeue: bool,
    /// Terminal state of the pass
    pub outcome: PassOutcome,
}

impl ReconcileResult {
    fn done(outcome: PassOutcome) -> Self {
        Self {
            requeue: false,
            outcome,
        }
    }

    fn retry(outcome: PassOutcome) -> Self {
        Self {
            requeue: true,
            outcome,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Default periodic resync interval
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);
/// Default delay before retrying a failed pass
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(5);
/// Default delay while caches are still syncing
pub const DEFAULT_CACHE_SYNC_POLL: Duration = Duration::from_millis(500);
/// Default number of ReplicaSets reconciled at once
pub const DEFAULT_CONCURRENCY: u16 = 4;

/// Controller tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue delay after a converged pass
    pub resync_period: Duration,
    /// Requeue delay after a failed status write or reconcile error
    pub requeue_after: Duration,
    /// Requeue delay while the caches have not synced
    pub cache_sync_poll: Duration,
    /// Maximum concurrent reconciles across distinct ReplicaSets
    pub concurrency: u16,
    /// Restrict watches to one namespace; `None` watches all namespaces
    pub namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_period: DEFAULT_RESYNC_PERIOD,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            cache_sync_poll: DEFAULT_CACHE_SYNC_POLL,
            concurrency: DEFAULT_CONCURRENCY,
            namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Reject zero periods and zero concurrency
    pub fn validate(&self) -> Result<(), Error> {
        let zero = [
            ("resync period", self.resync_period),
            ("requeue delay", self.requeue_after),
            ("cache sync poll", self.cache_sync_poll),
        ]
        .into_iter()
        .find(|(_, d)| d.is_zero());
        if let Some((what, _)) = zero {
            return Err(Error::malformed_in(
                "controller-config",
                format!("{} must be greater than zero", what),
            ));
        }
        if self.concurrency == 0 {
            return Err(Error::malformed_in(
                "controller-config",
                "concurrency must be greater than zero",
            ));
        }
        if self.namespace.as_deref() == Some("") {
            return Err(Error::malformed_in(
                "controller-config",
                "namespace must not be empty",
            ));
        }
        Ok(())
    }

    /// Controller action for a pass result
    pub fn action_for(&self, result: &ReconcileResult) -> Action {
        if result.requeue {
            Action::requeue(self.requeue_after)
        } else {
            Action::requeue(self.resync_period)
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Runs reconcile passes against a cache snapshot and a mutating client
pub struct Reconciler {
    cache: Arc<dyn CacheSnapshot>,
    kube: Arc<dyn ReplicaSetKubeClient>,
}

impl Reconciler {
    /// Create a reconciler over the given cache and client
    pub fn new(cache: Arc<dyn CacheSnapshot>, kube: Arc<dyn ReplicaSetKubeClient>) -> Self {
        Self { cache, kube }
    }

    /// Run one pass for `request`
    ///
    /// Returns `Err` only when the cached ReplicaSet cannot be reconciled at
    /// all (no uid or spec, or an invalid selector). A missing template and
    /// failed creates or deletes become the pass's manage error and surface in
    /// status. A failed status write is reported through [`ReconcileResult`].
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResult, Error> {
        let Some(rs) = self
            .cache
            .get_replica_set(&request.namespace, &request.name)
        else {
            debug!(replica_set = %request, "ReplicaSet not in cache, treating as deleted");
            return Ok(ReconcileResult::done(PassOutcome::Deleted));
        };

        let spec = rs.spec.as_ref().ok_or_else(|| {
            Error::malformed_in("reconcile", format!("ReplicaSet {} has no spec", request))
        })?;
        let selector = Selector::from_label_selector(&spec.selector, &request.to_string())?;

        let active: Vec<_> = self
            .cache
            .list_pods(&request.namespace)
            .into_iter()
            .filter(|p| is_active(p))
            .collect();

        let outcome = claim(&rs, &selector, &active)?;
        self.apply_claim_mutations(request, &outcome.mutations)
            .await;
        let claimed = outcome.claimed;

        let desired = desired_replicas(&rs);
        let action = diff(desired, claimed.len());
        info!(
            replica_set = %request,
            desired,
            claimed = claimed.len(),
            ?action,
            "Reconciling ReplicaSet"
        );

        let mut manage_error = None;
        match action {
            ReplicaAction::None => {}
            ReplicaAction::CreateOne => {
                let created = match pod_from_template(&rs) {
                    Ok(pod) => self.kube.create_pod(&request.namespace, &pod).await,
                    Err(e) => Err(e),
                };
                match created {
                    Ok(created) => {
                        info!(replica_set = %request, pod = %created.name_any(), "Created pod");
                    }
                    Err(e) => {
                        error!(replica_set = %request, error = %e, "Failed to create pod");
                        manage_error = Some(e);
                    }
                }
            }
            ReplicaAction::Delete(count) => {
                for victim in deletion_victims(&claimed, count) {
                    let name = victim.name_any();
                    match self.kube.delete_pod(&request.namespace, &name).await {
                        Ok(()) => info!(replica_set = %request, pod = %name, "Deleted pod"),
                        Err(e) => {
                            error!(
                                replica_set = %request,
                                pod = %name,
                                error = %e,
                                "Failed to delete pod"
                            );
                            manage_error = Some(e);
                        }
                    }
                }
            }
        }

        let previous = rs.status.clone().unwrap_or_default();
        let new_status = status::compute(&rs, &claimed, manage_error.as_ref(), &previous);

        let mut updated = (*rs).clone();
        updated.status = Some(new_status);
        match self.kube.replace_status(&updated).await {
            Ok(()) => {
                debug!(replica_set = %request, "Status persisted");
                Ok(ReconcileResult::done(PassOutcome::StatusPersisted))
            }
            Err(e) => {
                error!(replica_set = %request, error = %e, "Failed to persist status");
                Ok(ReconcileResult::retry(PassOutcome::StatusPersistFailed))
            }
        }
    }

    /// Issue adopt/release patches concurrently; failures are only logged
    async fn apply_claim_mutations(&self, request: &ReconcileRequest, mutations: &[ClaimMutation]) {
        if mutations.is_empty() {
            return;
        }

        let results = join_all(mutations.iter().map(|m| {
            self.kube
                .patch_pod_owners(&m.namespace, &m.pod, &m.patch)
        }))
        .await;

        for (mutation, result) in mutations.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(e) if e.is_conflict() => debug!(
                    replica_set = %request,
                    pod = %mutation.pod,
                    kind = ?mutation.kind,
                    "Owner reference patch lost a resourceVersion race, next pass will retry"
                ),
                Err(e) => warn!(
                    replica_set = %request,
                    pod = %mutation.pod,
                    kind = ?mutation.kind,
                    error = %e,
                    "Owner reference patch failed, next pass will retry"
                ),
            }
        }
    }
}

// =============================================================================
// Controller adapter
// =============================================================================

/// Shared state for the ReplicaSet controller
pub struct Context {
    /// Pass runner
    pub reconciler: Reconciler,
    /// Cache readiness
    pub gate: ReadinessGate,
    /// Requeue tuning
    pub config: ControllerConfig,
}

impl Context {
    /// Bundle a reconciler with its readiness gate and config
    pub fn new(reconciler: Reconciler, gate: ReadinessGate, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            gate,
            config,
        }
    }
}

/// Reconcile entry point for the kube-rs controller
///
/// Parks the key while the caches are still syncing.
pub async fn reconcile(rs: Arc<ReplicaSet>, ctx: Arc<Context>) -> Result<Action, Error> {
    let request = ReconcileRequest::for_replica_set(&rs)?;
    if !ctx.gate.is_ready() {
        debug!(replica_set = %request, "Caches not synced, deferring");
        return Ok(Action::requeue(ctx.config.cache_sync_poll));
    }

    let result = ctx.reconciler.reconcile(&request).await?;
    debug!(
        replica_set = %request,
        outcome = ?result.outcome,
        requeue = result.requeue,
        "Pass complete"
    );
    Ok(ctx.config.action_for(&result))
}

/// Error policy for the ReplicaSet controller
///
/// Retryable errors requeue after the retry delay. Errors that need the
/// ReplicaSet to change first wait for the resync period; an edit to the
/// object triggers a pass sooner.
pub fn error_policy(rs: Arc<ReplicaSet>, error: &Error, ctx: Arc<Context>) -> Action {
    let replica_set = format!("{}/{}", rs.namespace().unwrap_or_default(), rs.name_any());
    if error.is_retryable() {
        warn!(replica_set = %replica_set, error = %error, "ReplicaSet reconcile error, will retry");
        Action::requeue(ctx.config.requeue_after)
    } else {
        error!(
            replica_set = %replica_set,
            error = %error,
            "ReplicaSet cannot be reconciled until it changes"
        );
        Action::requeue(ctx.config.resync_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use k8s_openapi::api::apps::v1::{ReplicaSetSpec, ReplicaSetStatus};
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference, Time,
    };
    use replicator_common::{Operation, REASON_FAILED_CREATE, REPLICA_FAILURE_CONDITION};

    use crate::cache::{sort_by_name, SyncFlag};
    use crate::client::MockReplicaSetKubeClient;

    const NS: &str = "default";
    const RS_UID: &str = "rs-uid";

    // =========================================================================
    // Fixtures
    // =========================================================================

    #[derive(Default)]
    struct FakeCache {
        replica_sets: HashMap<(String, String), Arc<ReplicaSet>>,
        pods: Vec<Arc<Pod>>,
    }

    impl FakeCache {
        fn with(rs: ReplicaSet, pods: Vec<Pod>) -> Self {
            let key = (rs.namespace().unwrap_or_default(), rs.name_any());
            Self {
                replica_sets: HashMap::from([(key, Arc::new(rs))]),
                pods: pods.into_iter().map(Arc::new).collect(),
            }
        }
    }

    impl CacheSnapshot for FakeCache {
        fn get_replica_set(&self, namespace: &str, name: &str) -> Option<Arc<ReplicaSet>> {
            self.replica_sets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        fn list_pods(&self, namespace: &str) -> Vec<Arc<Pod>> {
            let mut pods: Vec<_> = self
                .pods
                .iter()
                .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect();
            sort_by_name(&mut pods);
            pods
        }
    }

    fn app_labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "web".to_string())])
    }

    fn replica_set(replicas: i32) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some(NS.to_string()),
                uid: Some(RS_UID.to_string()),
                resource_version: Some("10".to_string()),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(app_labels()),
                    ..Default::default()
                },
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(app_labels()),
                        ..Default::default()
                    }),
                    spec: None,
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            name: "web".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn pod(name: &str, owner_uid: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                uid: Some(format!("{}-uid", name)),
                labels: Some(app_labels()),
                owner_references: owner_uid.map(|u| vec![owner(u)]),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn owned(name: &str) -> Pod {
        pod(name, Some(RS_UID))
    }

    fn reconciler(cache: FakeCache, mock: MockReplicaSetKubeClient) -> Reconciler {
        Reconciler::new(Arc::new(cache), Arc::new(mock))
    }

    fn request() -> ReconcileRequest {
        ReconcileRequest::new(NS, "web")
    }

    /// Capture every status written through the mock
    fn capture_status(mock: &mut MockReplicaSetKubeClient) -> Arc<Mutex<Vec<ReplicaSetStatus>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        mock.expect_replace_status().returning(move |rs| {
            sink.lock()
                .unwrap()
                .push(rs.status.clone().unwrap_or_default());
            Ok(())
        });
        written
    }

    // =========================================================================
    // Passes
    // =========================================================================

    #[tokio::test]
    async fn missing_replica_set_is_deleted_without_calls() {
        let mock = MockReplicaSetKubeClient::new();
        let r = reconciler(FakeCache::default(), mock);

        let result = r.reconcile(&request()).await.unwrap();

        assert_eq!(result.outcome, PassOutcome::Deleted);
        assert!(!result.requeue);
    }

    #[tokio::test]
    async fn shortfall_creates_one_pod_and_reports_claimed_count() {
        let cache = FakeCache::with(replica_set(3), vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_create_pod()
            .times(1)
            .withf(|ns, pod| ns == NS && pod.metadata.generate_name.as_deref() == Some("web-"))
            .returning(|_, pod| {
                let mut created = pod.clone();
                created.metadata.name = Some("web-xyz".to_string());
                Ok(created)
            });
        mock.expect_delete_pod().never();
        let written = capture_status(&mut mock);

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(result.outcome, PassOutcome::StatusPersisted);
        assert!(!result.requeue);
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].replicas, 1);
        assert_eq!(written[0].ready_replicas, Some(1));
    }

    #[tokio::test]
    async fn surplus_deletes_from_the_front_of_the_cache_order() {
        let cache = FakeCache::with(
            replica_set(1),
            vec![owned("web-c"), owned("web-a"), owned("web-b")],
        );
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = deleted.clone();
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_create_pod().never();
        mock.expect_delete_pod().times(2).returning(move |_, name| {
            sink.lock().unwrap().push(name.to_string());
            Ok(())
        });
        let written = capture_status(&mut mock);

        reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(*deleted.lock().unwrap(), vec!["web-a", "web-b"]);
        assert_eq!(written.lock().unwrap()[0].replicas, 3);
    }

    #[tokio::test]
    async fn inactive_pods_are_not_counted() {
        let mut finished = owned("web-done");
        finished.status.as_mut().unwrap().phase = Some("Succeeded".to_string());
        let mut leaving = owned("web-leaving");
        leaving.metadata.deletion_timestamp = Some(Time(Default::default()));

        let cache = FakeCache::with(replica_set(1), vec![owned("web-a"), finished, leaving]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_create_pod().never();
        mock.expect_delete_pod().never();
        let written = capture_status(&mut mock);

        reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(written.lock().unwrap()[0].replicas, 1);
    }

    #[tokio::test]
    async fn orphan_is_adopted_and_counted_in_the_same_pass() {
        let cache = FakeCache::with(replica_set(1), vec![pod("web-orphan", None)]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_patch_pod_owners()
            .times(1)
            .withf(|ns, name, patch| {
                ns == NS
                    && name == "web-orphan"
                    && patch["metadata"]["ownerReferences"][0]["uid"] == RS_UID
            })
            .returning(|_, _, _| Ok(()));
        mock.expect_create_pod().never();
        let written = capture_status(&mut mock);

        reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(written.lock().unwrap()[0].replicas, 1);
    }

    #[tokio::test]
    async fn failed_owner_patch_does_not_become_a_manage_error() {
        let cache = FakeCache::with(replica_set(1), vec![pod("web-orphan", None)]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_patch_pod_owners().returning(|_, _, _| {
            Err(Error::Mutation {
                operation: Operation::PatchPodOwners,
                object: "default/web-orphan".to_string(),
                message: "forbidden".to_string(),
                status_code: Some(403),
            })
        });
        let written = capture_status(&mut mock);

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(result.outcome, PassOutcome::StatusPersisted);
        assert!(status::get_condition(&written.lock().unwrap()[0], REPLICA_FAILURE_CONDITION)
            .is_none());
    }

    #[tokio::test]
    async fn conflicting_owner_patch_is_retried_next_pass() {
        let cache = FakeCache::with(replica_set(1), vec![pod("web-orphan", None)]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_patch_pod_owners().times(1).returning(|_, _, _| {
            Err(Error::Mutation {
                operation: Operation::PatchPodOwners,
                object: "default/web-orphan".to_string(),
                message: "the object has been modified".to_string(),
                status_code: Some(409),
            })
        });
        mock.expect_create_pod().never();
        let written = capture_status(&mut mock);

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        // Membership follows the claim table even when the adopt patch loses
        assert_eq!(result.outcome, PassOutcome::StatusPersisted);
        assert_eq!(written.lock().unwrap()[0].replicas, 1);
    }

    #[tokio::test]
    async fn pods_of_another_owner_are_left_alone() {
        let cache = FakeCache::with(replica_set(1), vec![pod("web-theirs", Some("other-uid"))]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_patch_pod_owners().never();
        mock.expect_create_pod()
            .times(1)
            .returning(|_, pod| Ok(pod.clone()));
        let written = capture_status(&mut mock);

        reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(written.lock().unwrap()[0].replicas, 0);
    }

    #[tokio::test]
    async fn create_failure_is_recorded_in_status() {
        let cache = FakeCache::with(
            replica_set(5),
            vec![owned("web-a"), owned("web-b"), owned("web-c")],
        );
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_create_pod().returning(|_, _| {
            Err(Error::mutation(Operation::CreatePod, "default/web-*", "exceeded quota"))
        });
        let written = capture_status(&mut mock);

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        // The failure is in status, so the pass itself does not requeue early
        assert_eq!(result.outcome, PassOutcome::StatusPersisted);
        assert!(!result.requeue);
        let written = written.lock().unwrap();
        let cond = status::get_condition(&written[0], REPLICA_FAILURE_CONDITION).unwrap();
        assert_eq!(cond.reason.as_deref(), Some(REASON_FAILED_CREATE));
        assert_eq!(written[0].replicas, 3);
    }

    #[tokio::test]
    async fn missing_template_is_recorded_as_failed_create() {
        let mut rs = replica_set(3);
        rs.spec.as_mut().unwrap().template = None;
        let cache = FakeCache::with(rs, vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_create_pod().never();
        let written = capture_status(&mut mock);

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(result.outcome, PassOutcome::StatusPersisted);
        assert!(!result.requeue);
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].replicas, 1);
        let cond = status::get_condition(&written[0], REPLICA_FAILURE_CONDITION).unwrap();
        assert_eq!(cond.reason.as_deref(), Some(REASON_FAILED_CREATE));
        assert!(cond.message.as_deref().unwrap().contains("template"));
    }

    #[tokio::test]
    async fn last_delete_failure_wins() {
        let cache = FakeCache::with(
            replica_set(0),
            vec![owned("web-a"), owned("web-b"), owned("web-c")],
        );
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_delete_pod().times(3).returning(|_, name| {
            if name == "web-b" {
                Ok(())
            } else {
                Err(Error::mutation(
                    Operation::DeletePod,
                    format!("default/{}", name),
                    "forbidden",
                ))
            }
        });
        let written = capture_status(&mut mock);

        reconciler(cache, mock).reconcile(&request()).await.unwrap();

        let written = written.lock().unwrap();
        let cond = status::get_condition(&written[0], REPLICA_FAILURE_CONDITION).unwrap();
        assert!(cond.message.as_deref().unwrap().contains("web-c"));
    }

    #[tokio::test]
    async fn status_write_failure_requeues() {
        let cache = FakeCache::with(replica_set(1), vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_replace_status().returning(|_| {
            Err(Error::Mutation {
                operation: Operation::ReplaceStatus,
                object: "default/web".to_string(),
                message: "the object has been modified".to_string(),
                status_code: Some(409),
            })
        });

        let result = reconciler(cache, mock).reconcile(&request()).await.unwrap();

        assert_eq!(result.outcome, PassOutcome::StatusPersistFailed);
        assert!(result.requeue);
    }

    #[tokio::test]
    async fn status_write_carries_cached_resource_version() {
        let cache = FakeCache::with(replica_set(1), vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_replace_status()
            .times(1)
            .withf(|rs| rs.metadata.resource_version.as_deref() == Some("10"))
            .returning(|_| Ok(()));

        reconciler(cache, mock).reconcile(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_selector_is_an_error() {
        let mut rs = replica_set(1);
        rs.spec.as_mut().unwrap().selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
            ..Default::default()
        };
        let cache = FakeCache::with(rs, vec![owned("web-a")]);
        let mock = MockReplicaSetKubeClient::new();

        let err = reconciler(cache, mock)
            .reconcile(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSelector { .. }));
    }

    // =========================================================================
    // Controller adapter
    // =========================================================================

    fn context(cache: FakeCache, mock: MockReplicaSetKubeClient, ready: bool) -> Arc<Context> {
        let gate = ReadinessGate::new(SyncFlag::default(), SyncFlag::default());
        if ready {
            gate.replica_sets.mark_synced();
            gate.pods.mark_synced();
        }
        Arc::new(Context::new(
            reconciler(cache, mock),
            gate,
            ControllerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn unsynced_caches_park_the_key() {
        let cache = FakeCache::with(replica_set(3), vec![]);
        let mock = MockReplicaSetKubeClient::new();
        let ctx = context(cache, mock, false);

        let action = reconcile(Arc::new(replica_set(3)), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_CACHE_SYNC_POLL));
    }

    #[tokio::test]
    async fn converged_pass_requeues_at_resync_period() {
        let cache = FakeCache::with(replica_set(1), vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_replace_status().returning(|_| Ok(()));
        let ctx = context(cache, mock, true);

        let action = reconcile(Arc::new(replica_set(1)), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_RESYNC_PERIOD));
    }

    #[tokio::test]
    async fn failed_status_write_requeues_quickly() {
        let cache = FakeCache::with(replica_set(1), vec![owned("web-a")]);
        let mut mock = MockReplicaSetKubeClient::new();
        mock.expect_replace_status().returning(|_| {
            Err(Error::mutation(Operation::ReplaceStatus, "default/web", "unavailable"))
        });
        let ctx = context(cache, mock, true);

        let action = reconcile(Arc::new(replica_set(1)), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_REQUEUE_AFTER));
    }

    #[test]
    fn retryable_errors_requeue_after_retry_delay() {
        let ctx = context(FakeCache::default(), MockReplicaSetKubeClient::new(), true);
        let err = Error::mutation(Operation::ReplaceStatus, "default/web", "unavailable");
        let action = error_policy(Arc::new(replica_set(1)), &err, ctx);
        assert_eq!(action, Action::requeue(DEFAULT_REQUEUE_AFTER));
    }

    #[test]
    fn permanent_errors_wait_for_resync() {
        let ctx = context(FakeCache::default(), MockReplicaSetKubeClient::new(), true);
        let err = Error::invalid_selector("default/web", "unknown operator Near");
        let action = error_policy(Arc::new(replica_set(1)), &err, ctx.clone());
        assert_eq!(action, Action::requeue(DEFAULT_RESYNC_PERIOD));

        let err = Error::malformed_in("replica-set-key", "ReplicaSet has no namespace");
        let action = error_policy(Arc::new(replica_set(1)), &err, ctx);
        assert_eq!(action, Action::requeue(DEFAULT_RESYNC_PERIOD));
    }

    // =========================================================================
    // Config
    // =========================================================================

    #[test]
    fn default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = ControllerConfig {
            resync_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("resync period"));

        let config = ControllerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            namespace: Some(String::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn request_display_and_key() {
        let req = ReconcileRequest::for_replica_set(&replica_set(1)).unwrap();
        assert_eq!(req, request());
        assert_eq!(req.to_string(), "default/web");
        assert_eq!(req.object_ref(), ObjectRef::new("web").within("default"));

        let mut rs = replica_set(1);
        rs.metadata.namespace = None;
        assert!(ReconcileRequest::for_replica_set(&rs).is_err());
    }
}
