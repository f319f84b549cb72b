//! Node selector evaluation
//!
//! A policy applies to a node when every `nodeSelector` entry is present in
//! the node's labels with the required value. The evaluator reports the
//! entries that fail, so the enactment message can name exactly what did not
//! match.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::crd::types::LabelMap;
use crate::crd::NodeNetworkConfigurationPolicy;
use crate::store::{not_found_error, NodeClient};
use crate::Result;

/// The selector entries not satisfied by the given labels. Empty means match.
pub fn unmatched_labels(node_selector: &LabelMap, labels: &LabelMap) -> LabelMap {
    node_selector
        .iter()
        .filter(|(key, value)| labels.get(*key) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Evaluate the policy selector against the named node's current labels.
///
/// A node read failure surfaces as an error; the reconciler reports it as a
/// NodeSelectorFailure on the enactment rather than guessing a verdict.
pub async fn unmatched_node_labels(
    nodes: &dyn NodeClient,
    policy: &NodeNetworkConfigurationPolicy,
    node_name: &str,
) -> Result<LabelMap> {
    let node = nodes
        .get(node_name)
        .await?
        .ok_or_else(|| not_found_error("nodes", node_name))?;
    Ok(unmatched_labels(
        &policy.spec.node_selector,
        &node.labels().clone().into_iter().collect(),
    ))
}

/// True when the node satisfies the selector
pub fn node_matches(node: &Node, node_selector: &LabelMap) -> bool {
    let labels: LabelMap = node.labels().clone().into_iter().collect();
    unmatched_labels(node_selector, &labels).is_empty()
}

/// Count the nodes in the cluster that satisfy the selector. This is the
/// denominator for percentage maxUnavailable and for the aggregator's
/// "x/y nodes" messages.
pub async fn matching_node_count(nodes: &dyn NodeClient, node_selector: &LabelMap) -> Result<usize> {
    let all = nodes.list().await?;
    Ok(all
        .iter()
        .filter(|node| node_matches(node, node_selector))
        .count())
}
