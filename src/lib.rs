//! knmstate - declarative node network configuration for Kubernetes clusters
//!
//! Users submit NodeNetworkConfigurationPolicy objects describing a desired
//! host network state plus a node selector. A per-node handler fleet applies
//! matching policies through an external network-state engine, honoring a
//! cluster-wide maxUnavailable budget, and reports per-node outcomes as
//! NodeNetworkConfigurationEnactment objects that are aggregated back into
//! the policy status. Live host state is exported as NodeNetworkState.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (NNCP, NNCE, NNS, NMState)
//! - [`controller`] - Reconcilers: policy rollout, NNS reporter, operator
//! - [`enactment`] - Enactment store, condition setters, condition counter
//! - [`capacity`] - The cluster-wide maxUnavailable admission gate
//! - [`policyconditions`] - Aggregation of enactments into policy status
//! - [`selectors`] - Node selector evaluation
//! - [`predicates`] - Watch event filters
//! - [`engine`] - Network-state engine contract and nmstatectl wrapper
//! - [`webhook`] - Mutating admission webhook (mutation timestamps)
//! - [`store`] - Trait seams over the object store
//! - [`environment`] - Role selection and process environment
//! - [`lock`] - Per-node process-singleton file lock
//! - [`retry`] - Backoff and conflict-retry helpers
//! - [`error`] - Error types

#![warn(missing_docs)]

pub mod capacity;
pub mod controller;
pub mod crd;
pub mod enactment;
pub mod engine;
pub mod environment;
pub mod error;
pub mod lock;
pub mod policyconditions;
pub mod predicates;
pub mod retry;
pub mod selectors;
pub mod store;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
