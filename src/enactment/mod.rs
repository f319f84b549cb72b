//! Enactment store access
//!
//! CRUD around NNCE objects keyed by `<node>.<policy>`, plus the higher-level
//! helpers the reconciler uses: create-if-absent with propagation wait,
//! status read-modify-write with conflict retry, and condition reset at the
//! start of a new generation.

pub mod conditions;
pub mod counter;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    enactment_key, NodeNetworkConfigurationEnactment, NodeNetworkConfigurationEnactmentStatus,
    NodeNetworkConfigurationPolicy, ENACTMENT_POLICY_LABEL,
};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::{Error, Result};

/// How often to poll while waiting for a created enactment to propagate
pub const WAIT_CREATED_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for a created enactment before giving up
pub const WAIT_CREATED_TIMEOUT: Duration = Duration::from_secs(10);

/// Store operations on enactment objects.
///
/// The reconciler only sees this trait; production wraps `kube::Api`, tests
/// substitute mocks or the in-memory fake cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnactmentClient: Send + Sync {
    /// Fetch the enactment with the given `<node>.<policy>` key
    async fn get(&self, key: &str) -> Result<Option<NodeNetworkConfigurationEnactment>>;

    /// Create a new enactment object
    async fn create(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()>;

    /// List every enactment labeled for the given policy
    async fn list_for_policy(&self, policy: &str)
        -> Result<Vec<NodeNetworkConfigurationEnactment>>;

    /// Write the enactment's status using its embedded resource version.
    /// The store rejects the write with a conflict if the version is stale.
    async fn replace_status(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()>;
}

/// Production implementation backed by the cluster API
pub struct EnactmentClientImpl {
    api: Api<NodeNetworkConfigurationEnactment>,
}

impl EnactmentClientImpl {
    /// Create a client for cluster-scoped enactments
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl EnactmentClient for EnactmentClientImpl {
    async fn get(&self, key: &str) -> Result<Option<NodeNetworkConfigurationEnactment>> {
        Ok(self.api.get_opt(key).await?)
    }

    async fn create(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()> {
        self.api.create(&PostParams::default(), enactment).await?;
        Ok(())
    }

    async fn list_for_policy(
        &self,
        policy: &str,
    ) -> Result<Vec<NodeNetworkConfigurationEnactment>> {
        let lp = ListParams::default().labels(&format!("{ENACTMENT_POLICY_LABEL}={policy}"));
        Ok(self.api.list(&lp).await?.items)
    }

    async fn replace_status(&self, enactment: &NodeNetworkConfigurationEnactment) -> Result<()> {
        let name = enactment
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("enactment without a name"))?;
        let data = serde_json::to_vec(enactment)
            .map_err(|e| Error::serialization(format!("enactment status: {e}")))?;
        self.api
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok(())
    }
}

/// Fetch the enactment for (node, policy), creating it if absent.
///
/// A freshly created object may not be readable immediately; creation is
/// followed by a propagation wait so callers always get the object back.
/// Returns the enactment and whether it already existed.
pub async fn create_if_absent(
    client: &dyn EnactmentClient,
    node: &Node,
    policy: &NodeNetworkConfigurationPolicy,
) -> Result<(NodeNetworkConfigurationEnactment, bool)> {
    let node_name = node.metadata.name.as_deref().unwrap_or_default();
    let policy_name = policy.metadata.name.as_deref().unwrap_or_default();
    let key = enactment_key(node_name, policy_name);

    if let Some(existing) = client.get(&key).await? {
        return Ok((existing, true));
    }

    info!(enactment = %key, "creating enactment");
    let enactment = NodeNetworkConfigurationEnactment::for_node_policy(node, policy);
    match client.create(&enactment).await {
        Ok(()) => {}
        // Another reconcile of the same key won the create; fall through to
        // the propagation wait and read it back.
        Err(e) if e.is_conflict() => debug!(enactment = %key, "enactment already created"),
        Err(e) => return Err(e),
    }

    let created = wait_created(client, &key).await?;
    Ok((created, false))
}

/// Poll the store until a created enactment becomes readable
pub async fn wait_created(
    client: &dyn EnactmentClient,
    key: &str,
) -> Result<NodeNetworkConfigurationEnactment> {
    let deadline = tokio::time::Instant::now() + WAIT_CREATED_TIMEOUT;
    loop {
        if let Some(enactment) = client.get(key).await? {
            return Ok(enactment);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::timeout(format!(
                "enactment {key} not visible after {}s",
                WAIT_CREATED_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(WAIT_CREATED_INTERVAL).await;
    }
}

/// Read-modify-write the enactment status, retrying on version conflict
pub async fn update_status<F>(client: &dyn EnactmentClient, key: &str, mutate: F) -> Result<()>
where
    F: Fn(&mut NodeNetworkConfigurationEnactmentStatus) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(
        &RetryConfig::conflict_default(),
        "enactment_status_update",
        move || async move {
            let mut enactment = client
                .get(key)
                .await?
                .ok_or_else(|| Error::timeout(format!("enactment {key} disappeared")))?;
            let mut status = enactment.status.take().unwrap_or_default();
            mutate(&mut status);
            enactment.status = Some(status);
            client.replace_status(&enactment).await
        },
    )
    .await
}

/// Clear every condition, at the start of a new policy generation
pub async fn reset(client: &dyn EnactmentClient, key: &str) -> Result<()> {
    debug!(enactment = %key, "resetting enactment conditions");
    update_status(client, key, |status| status.conditions.clear()).await
}
