//! NodeNetworkConfigurationEnactment Custom Resource Definition
//!
//! One enactment exists per (node, policy) pair with a matching selector,
//! named `<node>.<policy>`. It is the per-node report object: the handler on
//! that node is its only writer; every other participant treats it as
//! read-only input for counting.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::policy::NodeNetworkConfigurationPolicy;
use super::types::{ConditionList, State};

/// Label identifying the policy an enactment reports for
pub const ENACTMENT_POLICY_LABEL: &str = "nmstate.io/policy";

/// Label identifying the node an enactment reports for
pub const ENACTMENT_NODE_LABEL: &str = "nmstate.io/node";

/// Specification for a NodeNetworkConfigurationEnactment.
///
/// Enactments carry everything in status; the spec exists only to satisfy the
/// resource shape.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nmstate.io",
    version = "v1beta1",
    kind = "NodeNetworkConfigurationEnactment",
    plural = "nodenetworkconfigurationenactments",
    shortname = "nnce",
    status = "NodeNetworkConfigurationEnactmentStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.status==\"True\")].type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationEnactmentSpec {}

/// Status for a NodeNetworkConfigurationEnactment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationEnactmentStatus {
    /// The desired state rendered for this node from the policy document
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub desired_state: State,

    /// The policy generation this report corresponds to. Counters treat
    /// reports for older generations as stale.
    #[serde(default)]
    pub policy_generation: i64,

    /// The enactment condition vector (Matching, Pending, Progressing,
    /// Available, Failing, Aborted)
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,
}

/// The well-known name of the enactment for a (node, policy) pair
pub fn enactment_key(node: &str, policy: &str) -> String {
    format!("{node}.{policy}")
}

impl NodeNetworkConfigurationEnactment {
    /// Build the enactment for `node` reporting on `policy`.
    ///
    /// Both the node and the policy own the enactment, so deleting either
    /// garbage-collects it; the policy/node labels let counters list by
    /// policy without parsing names.
    pub fn for_node_policy(node: &Node, policy: &NodeNetworkConfigurationPolicy) -> Self {
        let node_name = node.name_any();
        let policy_name = policy.name_any();

        let mut enactment = Self::new(
            &enactment_key(&node_name, &policy_name),
            NodeNetworkConfigurationEnactmentSpec::default(),
        );
        enactment.metadata.labels = Some(
            [
                (ENACTMENT_POLICY_LABEL.to_string(), policy_name.clone()),
                (ENACTMENT_NODE_LABEL.to_string(), node_name.clone()),
            ]
            .into_iter()
            .collect(),
        );
        enactment.metadata.owner_references = Some(vec![
            OwnerReference {
                api_version: Node::api_version(&()).to_string(),
                kind: Node::kind(&()).to_string(),
                name: node_name,
                uid: node.uid().unwrap_or_default(),
                ..Default::default()
            },
            OwnerReference {
                api_version: NodeNetworkConfigurationPolicy::api_version(&()).to_string(),
                kind: NodeNetworkConfigurationPolicy::kind(&()).to_string(),
                name: policy_name,
                uid: policy.uid().unwrap_or_default(),
                ..Default::default()
            },
        ]);
        enactment.status = Some(NodeNetworkConfigurationEnactmentStatus::default());
        enactment
    }

    /// The generation this enactment last reported for
    pub fn policy_generation(&self) -> i64 {
        self.status
            .as_ref()
            .map(|s| s.policy_generation)
            .unwrap_or(0)
    }

    /// The enactment's condition vector (empty if status was never written)
    pub fn conditions(&self) -> ConditionList {
        self.status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }
}
