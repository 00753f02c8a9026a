//! Error types for the replicator
//!
//! Errors are structured with fields to aid debugging in production.
//! A missing ReplicaSet in the cache is not an error (the set is converged);
//! everything that can go wrong while reconciling is one of the variants below.

use std::fmt;

use thiserror::Error;

/// Mutating call issued against the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create a pod from the ReplicaSet template
    CreatePod,
    /// Delete a surplus pod
    DeletePod,
    /// Adopt or release a pod by rewriting its owner references
    PatchPodOwners,
    /// Replace the ReplicaSet status subresource
    ReplaceStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::CreatePod => "create pod",
            Operation::DeletePod => "delete pod",
            Operation::PatchPodOwners => "patch pod owners",
            Operation::ReplaceStatus => "replace status",
        };
        f.write_str(s)
    }
}

/// Main error type for replicator operations
#[derive(Debug, Error)]
pub enum Error {
    /// A create/delete/patch/status-replace call failed
    #[error("{operation} failed for {object}: {message}")]
    Mutation {
        /// Which call failed
        operation: Operation,
        /// `namespace/name` of the object the call targeted
        object: String,
        /// Description of what failed
        message: String,
        /// HTTP status code returned by the API server, if any
        status_code: Option<u16>,
    },

    /// An object reached a filter, mapper or the reconciler with an unexpected shape
    #[error("malformed input [{context}]: {message}")]
    MalformedInput {
        /// Where the object was rejected (e.g., "event-mapper", "reconciler")
        context: String,
        /// Description of what's missing or wrong
        message: String,
    },

    /// The ReplicaSet selector cannot be turned into a matcher
    #[error("invalid selector for {replica_set}: {message}")]
    InvalidSelector {
        /// `namespace/name` of the ReplicaSet
        replica_set: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a mutation error without an HTTP status
    pub fn mutation(
        operation: Operation,
        object: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Mutation {
            operation,
            object: object.into(),
            message: msg.into(),
            status_code: None,
        }
    }

    /// Create a mutation error from a kube-rs error, keeping the API status code
    pub fn from_kube(operation: Operation, object: impl Into<String>, err: kube::Error) -> Self {
        let status_code = match &err {
            kube::Error::Api(ae) => Some(ae.code),
            _ => None,
        };
        Self::Mutation {
            operation,
            object: object.into(),
            message: err.to_string(),
            status_code,
        }
    }

    /// Create a malformed-input error with context
    pub fn malformed_in(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedInput {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-selector error for a ReplicaSet
    pub fn invalid_selector(replica_set: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSelector {
            replica_set: replica_set.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// HTTP status code of a failed mutating call
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Mutation { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// The API server rejected the call on its optimistic-concurrency check
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// The targeted object no longer exists
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Check if this error is retryable
    ///
    /// Malformed input and invalid selectors need the object to change first.
    /// Mutations are retryable unless the API server answered with a 4xx other
    /// than a conflict.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Mutation { .. } => match self.status_code() {
                Some(409) => true,
                Some(code) => !(400..500).contains(&code),
                None => true,
            },
            Error::MalformedInput { .. } => false,
            Error::InvalidSelector { .. } => false,
            Error::Serialization { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
