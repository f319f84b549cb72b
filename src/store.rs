//! Store access for policies, nodes and node network states
//!
//! Thin trait seams over the object store so the rollout machine can be
//! exercised without a cluster. Production implementations wrap `kube::Api`;
//! tests substitute mocks or the in-memory fake cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::core::ErrorResponse;
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::{NodeNetworkConfigurationPolicy, NodeNetworkState};
use crate::{Error, Result};

/// Build the store's not-found error for a missing object, so fakes and
/// production surface the same shape to `Error::is_not_found`.
pub fn not_found_error(kind: &str, name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{kind} \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

/// Build the store's optimistic-concurrency conflict error, for fakes.
pub fn conflict_error(kind: &str, name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified"),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

/// Store operations on NodeNetworkConfigurationPolicy objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Fetch a policy by name
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkConfigurationPolicy>>;

    /// List all policies
    async fn list(&self) -> Result<Vec<NodeNetworkConfigurationPolicy>>;

    /// Write the policy's status using its embedded resource version. The
    /// store rejects the write with a conflict if the version is stale; this
    /// is the only cross-node synchronization primitive.
    async fn replace_status(&self, policy: &NodeNetworkConfigurationPolicy) -> Result<()>;
}

/// Production implementation backed by the cluster API
pub struct PolicyClientImpl {
    api: Api<NodeNetworkConfigurationPolicy>,
}

impl PolicyClientImpl {
    /// Create a client for cluster-scoped policies
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl PolicyClient for PolicyClientImpl {
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkConfigurationPolicy>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list(&self) -> Result<Vec<NodeNetworkConfigurationPolicy>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn replace_status(&self, policy: &NodeNetworkConfigurationPolicy) -> Result<()> {
        let name = policy
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("policy without a name"))?;
        let data = serde_json::to_vec(policy)
            .map_err(|e| Error::serialization(format!("policy status: {e}")))?;
        self.api
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok(())
    }
}

/// Read-only store operations on Node objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a node by name
    async fn get(&self, name: &str) -> Result<Option<Node>>;

    /// List all nodes
    async fn list(&self) -> Result<Vec<Node>>;
}

/// Production implementation backed by the cluster API
pub struct NodeClientImpl {
    api: Api<Node>,
}

impl NodeClientImpl {
    /// Create a node client
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeClient for NodeClientImpl {
    async fn get(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list(&self) -> Result<Vec<Node>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }
}

/// Store operations on NodeNetworkState objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateClient: Send + Sync {
    /// Fetch the NNS for a node
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkState>>;

    /// Create a new NNS object
    async fn create(&self, nns: &NodeNetworkState) -> Result<()>;

    /// Replace the NNS object (metadata and labels; the refresh trigger)
    async fn replace(&self, nns: &NodeNetworkState) -> Result<()>;

    /// Write the NNS status using its embedded resource version
    async fn replace_status(&self, nns: &NodeNetworkState) -> Result<()>;
}

/// Production implementation backed by the cluster API
pub struct StateClientImpl {
    api: Api<NodeNetworkState>,
}

impl StateClientImpl {
    /// Create a client for cluster-scoped node network states
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl StateClient for StateClientImpl {
    async fn get(&self, name: &str) -> Result<Option<NodeNetworkState>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, nns: &NodeNetworkState) -> Result<()> {
        self.api.create(&PostParams::default(), nns).await?;
        Ok(())
    }

    async fn replace(&self, nns: &NodeNetworkState) -> Result<()> {
        let name = nns
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("node network state without a name"))?;
        self.api.replace(name, &PostParams::default(), nns).await?;
        Ok(())
    }

    async fn replace_status(&self, nns: &NodeNetworkState) -> Result<()> {
        let name = nns
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("node network state without a name"))?;
        let data = serde_json::to_vec(nns)
            .map_err(|e| Error::serialization(format!("node network state status: {e}")))?;
        self.api
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok(())
    }
}
