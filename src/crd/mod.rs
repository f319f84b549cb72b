//! Custom Resource Definitions for the nmstate.io API group
//!
//! Four resources make up the surface: the user-authored policy (NNCP), the
//! per-(node, policy) report (NNCE), the per-node observed state (NNS) and
//! the operator singleton (NMState).

mod enactment;
mod nmstate;
mod policy;
mod state;
pub mod types;

pub use enactment::{
    enactment_key, NodeNetworkConfigurationEnactment, NodeNetworkConfigurationEnactmentSpec,
    NodeNetworkConfigurationEnactmentStatus, ENACTMENT_NODE_LABEL, ENACTMENT_POLICY_LABEL,
};
pub use nmstate::{NMState, NMStateSpec};
pub use policy::{
    NodeNetworkConfigurationPolicy, NodeNetworkConfigurationPolicySpec,
    NodeNetworkConfigurationPolicyStatus, WEBHOOK_MUTATION_TIMESTAMP_ANNOTATION,
};
pub use state::{NodeNetworkState, NodeNetworkStateSpec, NodeNetworkStateStatus, FORCE_REFRESH_LABEL};
pub use types::{
    Condition, ConditionList, ConditionReason, ConditionStatus, ConditionType, IntOrPercent,
    LabelMap, State,
};
