//! Common types for the replicator: errors, label selectors, ownership and
//! pod classification

#![deny(missing_docs)]

pub mod error;
pub mod ownership;
pub mod pod;
pub mod selector;
pub mod telemetry;

pub use error::{Error, Operation};
pub use pod::PodPhase;
pub use selector::Selector;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// ReplicaSet condition type set while creating or deleting pods fails
pub const REPLICA_FAILURE_CONDITION: &str = "ReplicaFailure";

/// `ReplicaFailure` reason when the pass was scaling up
pub const REASON_FAILED_CREATE: &str = "FailedCreate";

/// `ReplicaFailure` reason when the pass was scaling down
pub const REASON_FAILED_DELETE: &str = "FailedDelete";
