//! NodeNetworkConfigurationPolicy Custom Resource Definition
//!
//! An NNCP describes a desired host network state plus a node selector.
//! Every handler whose node matches the selector converges its host onto
//! `spec.desiredState` and reports progress through an enactment; the policy
//! status aggregates those per-node reports.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionList, IntOrPercent, LabelMap, State};

/// Annotation stamped by the mutating webhook on every spec change.
///
/// Holds a unix-nanosecond timestamp; handlers use it for change detection
/// that survives metadata-only updates.
pub const WEBHOOK_MUTATION_TIMESTAMP_ANNOTATION: &str = "nmstate.io/webhook-mutating-timestamp";

/// Specification for a NodeNetworkConfigurationPolicy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nmstate.io",
    version = "v1beta1",
    kind = "NodeNetworkConfigurationPolicy",
    plural = "nodenetworkconfigurationpolicies",
    shortname = "nncp",
    status = "NodeNetworkConfigurationPolicyStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.status==\"True\")].type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationPolicySpec {
    /// The network state this policy drives every matching node towards.
    /// Opaque to the controller; interpreted by the network-state engine.
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub desired_state: State,

    /// Label requirements a node must satisfy for this policy to apply.
    /// Empty selector matches every node.
    #[serde(default, skip_serializing_if = "LabelMap::is_empty")]
    pub node_selector: LabelMap,

    /// Cluster-wide cap on nodes applying this policy at once.
    /// Absent means "50%". Floored to 1 so rollouts always progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrPercent>,
}

/// Status for a NodeNetworkConfigurationPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationPolicyStatus {
    /// Aggregated rollout conditions (Available / Degraded / Progressing)
    #[serde(default, skip_serializing_if = "ConditionList::is_empty")]
    pub conditions: ConditionList,

    /// Number of nodes currently holding a slot of the unavailable budget
    #[serde(default)]
    pub unavailable_node_count: i64,

    /// When the unavailable count last changed, for the admission hysteresis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unavailable_node_count_update: Option<DateTime<Utc>>,
}

impl NodeNetworkConfigurationPolicyStatus {
    /// Add or replace a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.0.retain(|c| c.type_ != condition.type_);
        self.conditions.0.push(condition);
        self
    }
}

impl NodeNetworkConfigurationPolicy {
    /// The spec generation the store has recorded for this object
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }
}
