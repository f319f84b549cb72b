//! Error types for the knmstate handler and operator

use thiserror::Error;

/// Main error type for knmstate operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The cluster-wide maxUnavailable budget for a policy is saturated.
    ///
    /// Not a failure: the reconciler reports the enactment as Pending and
    /// retries once capacity frees up.
    #[error("maximal number of {unavailable} nodes are already processing policy configuration (max {max})")]
    MaxUnavailableReached {
        /// Nodes currently counted as unavailable for the policy
        unavailable: i64,
        /// The derived maxUnavailable cap
        max: i64,
    },

    /// The network-state engine rejected the desired state and rolled back
    #[error("error applying desired state: {0}")]
    EngineFailure(String),

    /// Missing or malformed process environment (NODE_NAME, lock path, ...)
    #[error("environment error: {0}")]
    Environment(String),

    /// The exclusive handler lock could not be acquired or created
    #[error("lock error: {0}")]
    Lock(String),

    /// Validation error for resource specs (e.g. malformed maxUnavailable)
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Timed out waiting for the store to propagate an object
    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Create an environment error with the given message
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }

    /// Create a lock error with the given message
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// True if this is an optimistic-concurrency conflict from the store
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// True if the store reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// True if this is the capacity-saturation signal rather than a failure
    pub fn is_saturation(&self) -> bool {
        matches!(self, Error::MaxUnavailableReached { .. })
    }
}
