//! NMState Custom Resource Definition
//!
//! The cluster singleton that drives the operator: its presence deploys the
//! handler fleet, its deletion tears it down. Only the oldest instance is
//! honored; the operator deletes newer duplicates.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::LabelMap;

/// Specification for the NMState singleton
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nmstate.io",
    version = "v1",
    kind = "NMState",
    plural = "nmstates",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NMStateSpec {
    /// Restricts which nodes run a handler. Empty schedules everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelMap>,
}
