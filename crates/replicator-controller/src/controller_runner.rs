//! Controller runner - builds the ReplicaSet controller future
//!
//! The controller's own reflector is the ReplicaSet cache. Pods are watched
//! through a second reflector whose events are classified, filtered and
//! mapped to their owning ReplicaSet before they reach the work queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, stream, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::cache::{mark_synced_when_ready, ReflectorCache};
use crate::client::ReplicaSetKubeClientImpl;
use crate::events::{admit, request_for, PodEvent, PodEventClassifier, ReadinessGate, WatchEvent};
use crate::reconcile::{
    error_policy, reconcile, Context, ControllerConfig, ReconcileRequest, Reconciler,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the ReplicaSet controller future
///
/// Runs until a shutdown signal is received. The cache readiness watchers
/// are polled alongside the controller.
pub fn build_replica_set_controller(
    client: Client,
    config: ControllerConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let (replica_sets, pods): (Api<ReplicaSet>, Api<Pod>) = match config.namespace.as_deref() {
        Some(ns) => {
            info!(namespace = %ns, "Watching a single namespace");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            )
        }
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let (pod_store, pod_writer) = reflector::store::<Pod>();
    let pod_triggers = pod_trigger_stream(pods, pod_store.clone(), pod_writer);

    let controller = Controller::new(replica_sets, watcher_config())
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .watches_stream(pod_triggers, |owner: ReplicaSet| Some(ObjectRef::from_obj(&owner)));
    let rs_store = controller.store();

    let gate = ReadinessGate::default();
    let rs_synced =
        mark_synced_when_ready(rs_store.clone(), gate.replica_sets.clone(), "replicasets");
    let pods_synced = mark_synced_when_ready(pod_store.clone(), gate.pods.clone(), "pods");

    let reconciler = Reconciler::new(
        Arc::new(ReflectorCache::new(rs_store, pod_store)),
        Arc::new(ReplicaSetKubeClientImpl::new(client)),
    );
    let ctx = Arc::new(Context::new(reconciler, gate, config));

    info!("- ReplicaSet controller");

    let run = controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("ReplicaSet"));

    Box::pin(async move {
        tokio::join!(run, rs_synced, pods_synced);
    })
}

/// Pod watch feeding the pod cache, yielding the owners of pods whose events pass the filters
///
/// Owners are emitted as key-only ReplicaSets; the reconcile reads the cached object.
fn pod_trigger_stream(
    api: Api<Pod>,
    store: Store<Pod>,
    mut writer: Writer<Pod>,
) -> impl Stream<Item = Result<ReplicaSet, watcher::Error>> + Send + 'static {
    let mut classifier = PodEventClassifier::new();
    watcher(api, watcher_config())
        .default_backoff()
        .map_ok(move |event| {
            let classified = classifier.classify(&store, &event);
            writer.apply_watcher_event(&event);
            stream::iter(classified.into_iter().map(Ok::<_, watcher::Error>))
        })
        .try_flatten()
        .try_filter_map(|event| future::ready(Ok(admitted_trigger(event).map(|r| owner_key(&r)))))
}

/// ReplicaSet carrying only the namespace and name of `request`
fn owner_key(request: &ReconcileRequest) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            namespace: Some(request.namespace.clone()),
            name: Some(request.name.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Owner to enqueue for an admitted, mappable pod event
fn admitted_trigger(event: PodEvent) -> Option<ReconcileRequest> {
    let pod = event.pod().clone();
    let event = WatchEvent::Pod(event);
    if !admit(&event) {
        return None;
    }

    match request_for(&event) {
        Ok(Some(request)) => {
            debug!(
                replica_set = %request,
                pod = %pod.metadata.name.as_deref().unwrap_or_default(),
                "Pod event enqueues owner"
            );
            Some(request)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Dropping malformed pod event");
            None
        }
    }
}

fn log_reconcile_result<E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<(ObjectRef<ReplicaSet>, controller::Action), E>) -> future::Ready<()> {
    move |result| {
        match result {
            Ok((obj, action)) => {
                debug!(replica_set = %obj, ?action, "{} reconciliation completed", controller_name)
            }
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        future::ready(())
    }
}
