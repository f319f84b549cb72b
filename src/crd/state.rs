//! NodeNetworkState Custom Resource Definition
//!
//! One NNS exists per node, owned by the node, carrying the last observed
//! host network state. The handler refreshes it on a fixed interval; the
//! policy reconciler forces an early refresh through a trigger label after
//! every apply.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConditionList, State};

/// Label the handler bumps (nanosecond timestamp) to force a re-observation
pub const FORCE_REFRESH_LABEL: &str = "nmstate.io/force-refresh";

/// Specification for a NodeNetworkState. Reporting happens in status.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nmstate.io",
    version = "v1beta1",
    kind = "NodeNetworkState",
    plural = "nodenetworkstates",
    shortname = "nns",
    status = "NodeNetworkStateStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkStateSpec {}

/// Status for a NodeNetworkState
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkStateStatus {
    /// The host network state as last observed by the engine
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub current_state: State,

    /// When the last successful observation was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_update_time: Option<DateTime<Utc>>,

    /// Version of the engine binary driving this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_nmstate_version: Option<String>,

    /// Version of the host network manager the engine talks to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network_manager_version: Option<String>,

    /// Reporting conditions (Available / Failing)
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,
}

impl NodeNetworkState {
    /// Build the NNS for a node, named after and owned by the node
    pub fn for_node(node: &Node) -> Self {
        let node_name = node.name_any();
        let mut nns = Self::new(&node_name, NodeNetworkStateSpec::default());
        nns.metadata.owner_references = Some(vec![OwnerReference {
            api_version: Node::api_version(&()).to_string(),
            kind: Node::kind(&()).to_string(),
            name: node_name,
            uid: node.uid().unwrap_or_default(),
            ..Default::default()
        }]);
        nns.status = Some(NodeNetworkStateStatus::default());
        nns
    }
}
