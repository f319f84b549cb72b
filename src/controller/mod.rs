//! Reconcilers for the nmstate.io resources
//!
//! Three reconcilers, one per role surface: the per-node policy rollout loop
//! and the NNS reporter (Handler role), and the NMState singleton operator
//! (Operator role).

pub mod operator;
pub mod policy;
pub mod state;

pub use policy::{error_policy, reconcile, Context, NODE_RUNNING_UPDATE_RETRY_TIME};
