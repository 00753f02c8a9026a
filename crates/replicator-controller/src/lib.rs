//! ReplicaSet controller
//!
//! Keeps the number of active pods controlled by each ReplicaSet equal to its
//! desired replica count:
//! - Claims matching orphans and releases pods that no longer match
//! - Creates one pod per pass on a shortfall, deletes the whole surplus
//! - Reports replica counts and a sticky `ReplicaFailure` condition in status
//!
//! Pod events are mapped to their owning ReplicaSet through a secondary
//! watch. Every pass reads from the informer caches only.

#![deny(missing_docs)]

pub mod cache;
pub mod claim;
pub mod client;
pub mod controller_runner;
pub mod diff;
pub mod events;
pub mod reconcile;
pub mod status;
pub mod template;

pub use cache::{CacheSnapshot, ReflectorCache, SyncFlag};
pub use client::{ReplicaSetKubeClient, ReplicaSetKubeClientImpl};
pub use controller_runner::build_replica_set_controller;
pub use events::{PodEvent, ReadinessGate, WatchEvent};
pub use reconcile::{
    error_policy, reconcile, Context, ControllerConfig, PassOutcome, ReconcileRequest,
    ReconcileResult, Reconciler,
};
