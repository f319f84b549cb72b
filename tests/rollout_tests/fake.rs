//! In-memory fake object store and scripted engine
//!
//! The fake store gives the rollout machine exactly what the real one does:
//! GET/LIST/CREATE plus status writes guarded by resource-version optimistic
//! concurrency. Writes from concurrent handlers conflict the same way they
//! would against a real API server, which is what the capacity admission
//! protocol is built on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use knmstate::controller::policy::Context;
use knmstate::crd::types::State;
use knmstate::crd::{
    NodeNetworkConfigurationEnactment, NodeNetworkConfigurationPolicy,
    NodeNetworkConfigurationPolicySpec, NodeNetworkState,
};
use knmstate::enactment::EnactmentClient;
use knmstate::engine::{EngineVersions, NetworkStateEngine};
use knmstate::store::{conflict_error, NodeClient, PolicyClient, StateClient};
use knmstate::{Error, Result};

#[derive(Default)]
struct ClusterData {
    policies: HashMap<String, NodeNetworkConfigurationPolicy>,
    enactments: HashMap<String, NodeNetworkConfigurationEnactment>,
    states: HashMap<String, NodeNetworkState>,
    nodes: HashMap<String, Node>,
    version_counter: u64,
    max_observed_unavailable: i64,
}

impl ClusterData {
    fn next_version(&mut self) -> String {
        self.version_counter += 1;
        self.version_counter.to_string()
    }
}

/// A shared in-memory cluster implementing every store seam
#[derive(Clone, Default)]
pub struct FakeCluster {
    data: Arc<Mutex<ClusterData>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, labels: &[(&str, &str)]) {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(format!("uid-{name}")),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.data.lock().unwrap().nodes.insert(name.to_string(), node);
    }

    pub fn set_node_labels(&self, name: &str, labels: &[(&str, &str)]) {
        let mut data = self.data.lock().unwrap();
        if let Some(node) = data.nodes.get_mut(name) {
            node.metadata.labels = Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
    }

    pub fn add_policy(&self, name: &str, spec: NodeNetworkConfigurationPolicySpec) {
        let mut policy = NodeNetworkConfigurationPolicy::new(name, spec);
        policy.metadata.generation = Some(1);
        policy.status = Some(Default::default());
        let mut data = self.data.lock().unwrap();
        policy.metadata.resource_version = Some(data.next_version());
        data.policies.insert(name.to_string(), policy);
    }

    /// Simulate a user spec update: the store bumps the generation
    pub fn bump_policy_generation(&self, name: &str) {
        let mut data = self.data.lock().unwrap();
        let version = data.next_version();
        if let Some(policy) = data.policies.get_mut(name) {
            policy.metadata.generation = Some(policy.metadata.generation.unwrap_or(0) + 1);
            policy.metadata.resource_version = Some(version);
        }
    }

    pub fn policy(&self, name: &str) -> NodeNetworkConfigurationPolicy {
        self.data.lock().unwrap().policies[name].clone()
    }

    pub fn enactment(&self, key: &str) -> Option<NodeNetworkConfigurationEnactment> {
        self.data.lock().unwrap().enactments.get(key).cloned()
    }

    pub fn unavailable_count(&self, policy: &str) -> i64 {
        self.data.lock().unwrap().policies[policy]
            .status
            .as_ref()
            .map(|s| s.unavailable_node_count)
            .unwrap_or(0)
    }

    /// High-water mark of unavailableNodeCount across every status write
    pub fn max_observed_unavailable(&self) -> i64 {
        self.data.lock().unwrap().max_observed_unavailable
    }

    /// Build a handler context for one node against this cluster
    pub fn handler_context(&self, node_name: &str, engine: Arc<dyn NetworkStateEngine>) -> Arc<Context> {
        Arc::new(Context::with_clients(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            engine,
            node_name.to_string(),
        ))
    }
}

#[async_trait]
impl PolicyClient for FakeCluster {
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkConfigurationPolicy>> {
        Ok(self.data.lock().unwrap().policies.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<NodeNetworkConfigurationPolicy>> {
        Ok(self.data.lock().unwrap().policies.values().cloned().collect())
    }

    async fn replace_status(&self, policy: &NodeNetworkConfigurationPolicy) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let name = policy.name_any();
        let Some(stored) = data.policies.get(&name) else {
            return Err(knmstate::store::not_found_error(
                "nodenetworkconfigurationpolicies",
                &name,
            ));
        };
        if stored.metadata.resource_version != policy.metadata.resource_version {
            return Err(conflict_error("nodenetworkconfigurationpolicies", &name));
        }

        let mut updated = stored.clone();
        updated.status = policy.status.clone();
        let version = data.next_version();
        updated.metadata.resource_version = Some(version);

        let count = updated
            .status
            .as_ref()
            .map(|s| s.unavailable_node_count)
            .unwrap_or(0);
        data.max_observed_unavailable = data.max_observed_unavailable.max(count);

        data.policies.insert(name, updated);
        Ok(())
    }
}

#[async_trait]
impl EnactmentClient for FakeCluster {
    async fn get(&self, key: &str) -> Result<Option<NodeNetworkConfigurationEnactment>> {
        Ok(self.data.lock().unwrap().enactments.get(key).cloned())
    }

    async fn create(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let key = enactment.name_any();
        if data.enactments.contains_key(&key) {
            return Err(conflict_error("nodenetworkconfigurationenactments", &key));
        }
        let mut stored = enactment.clone();
        let version = data.next_version();
        stored.metadata.resource_version = Some(version);
        data.enactments.insert(key, stored);
        Ok(())
    }

    async fn list_for_policy(
        &self,
        policy: &str,
    ) -> Result<Vec<NodeNetworkConfigurationEnactment>> {
        let suffix = format!(".{policy}");
        Ok(self
            .data
            .lock()
            .unwrap()
            .enactments
            .values()
            .filter(|e| e.name_any().ends_with(&suffix))
            .cloned()
            .collect())
    }

    async fn replace_status(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let key = enactment.name_any();
        let Some(stored) = data.enactments.get(&key) else {
            return Err(knmstate::store::not_found_error(
                "nodenetworkconfigurationenactments",
                &key,
            ));
        };
        if stored.metadata.resource_version != enactment.metadata.resource_version {
            return Err(conflict_error("nodenetworkconfigurationenactments", &key));
        }
        let mut updated = stored.clone();
        updated.status = enactment.status.clone();
        let version = data.next_version();
        updated.metadata.resource_version = Some(version);
        data.enactments.insert(key, updated);
        Ok(())
    }
}

#[async_trait]
impl NodeClient for FakeCluster {
    async fn get(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.data.lock().unwrap().nodes.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Node>> {
        Ok(self.data.lock().unwrap().nodes.values().cloned().collect())
    }
}

#[async_trait]
impl StateClient for FakeCluster {
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkState>> {
        Ok(self.data.lock().unwrap().states.get(name).cloned())
    }

    async fn create(&self, nns: &NodeNetworkState) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let name = nns.name_any();
        let mut stored = nns.clone();
        let version = data.next_version();
        stored.metadata.resource_version = Some(version);
        data.states.insert(name, stored);
        Ok(())
    }

    async fn replace(&self, nns: &NodeNetworkState) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let name = nns.name_any();
        let mut stored = nns.clone();
        let version = data.next_version();
        stored.metadata.resource_version = Some(version);
        data.states.insert(name, stored);
        Ok(())
    }

    async fn replace_status(&self, nns: &NodeNetworkState) -> Result<()> {
        self.replace(nns).await
    }
}

/// A gate scripted engines can block on, so tests control when an apply
/// "finishes" on the host
#[derive(Clone)]
pub struct Gate {
    sender: Arc<tokio::sync::watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn open(&self) {
        self.sender.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so this cannot fail.
        let _ = receiver.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// An engine with a scripted outcome and observable apply lifecycle
pub struct ScriptedEngine {
    outcome: std::result::Result<String, String>,
    gate: Option<Gate>,
    applies_started: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn succeeding(started: Arc<AtomicUsize>) -> Self {
        Self {
            outcome: Ok("desired state applied and verified".to_string()),
            gate: None,
            applies_started: started,
        }
    }

    pub fn failing(message: &str, started: Arc<AtomicUsize>) -> Self {
        Self {
            outcome: Err(message.to_string()),
            gate: None,
            applies_started: started,
        }
    }

    pub fn gated(gate: Gate, started: Arc<AtomicUsize>) -> Self {
        Self {
            outcome: Ok("desired state applied and verified".to_string()),
            gate: Some(gate),
            applies_started: started,
        }
    }
}

#[async_trait]
impl NetworkStateEngine for ScriptedEngine {
    async fn apply(&self, _desired_state: &State) -> Result<String> {
        self.applies_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait().await;
        }
        self.outcome
            .clone()
            .map_err(Error::EngineFailure)
    }

    async fn show(&self) -> Result<State> {
        Ok(State::default())
    }

    async fn versions(&self) -> Result<EngineVersions> {
        Ok(EngineVersions::default())
    }
}

/// Poll until the condition holds; panic with the description on timeout
pub async fn wait_for<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {description}");
}
