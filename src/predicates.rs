//! Watch predicates
//!
//! The policy watch is filtered to generation changes by the runtime's
//! generation predicate. The node watch needs a stateful filter of its own:
//! only label changes on this handler's node may fan out to every policy,
//! and the first observation after startup must not (startup already walks
//! all policies).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

/// Stateful filter passing only label changes of one node.
pub struct NodeLabelChanges {
    node_name: String,
    last_seen: Option<BTreeMap<String, String>>,
}

impl NodeLabelChanges {
    /// Filter for the named node
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            last_seen: None,
        }
    }

    /// Observe a node event; true when the node's labels changed since the
    /// previous observation.
    pub fn observe(&mut self, node: &Node) -> bool {
        if node.name_any() != self.node_name {
            return false;
        }

        let labels: BTreeMap<String, String> = node.labels().clone().into_iter().collect();
        match self.last_seen.replace(labels.clone()) {
            None => false,
            Some(previous) => previous != labels,
        }
    }
}
