//! NMState operator reconciler
//!
//! The operator turns the NMState singleton into the handler fleet. Only one
//! instance is honored: when users create duplicates, the oldest wins and
//! newer ones are deleted. The workload apply itself goes through the
//! `HandlerDeployment` seam; what the handler DaemonSet looks like is the
//! deployment's concern, not the reconciler's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::NMState;
use crate::environment::OperatorEnvironment;
use crate::{Error, Result};

/// Store operations on NMState objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NmstateClient: Send + Sync {
    /// List every NMState instance
    async fn list(&self) -> Result<Vec<NMState>>;

    /// Delete an instance by name
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Production implementation backed by the cluster API
pub struct NmstateClientImpl {
    api: Api<NMState>,
}

impl NmstateClientImpl {
    /// Create a client for the cluster-scoped singleton
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NmstateClient for NmstateClientImpl {
    async fn list(&self) -> Result<Vec<NMState>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Owns the handler workload manifests
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HandlerDeployment: Send + Sync {
    /// Bring the handler workload in line with the singleton's spec
    async fn ensure_handler(&self, nmstate: &NMState) -> Result<()>;
}

/// Applies the handler DaemonSet with server-side apply
pub struct DaemonSetHandlerDeployment {
    api: Api<DaemonSet>,
    env: OperatorEnvironment,
}

impl DaemonSetHandlerDeployment {
    /// Deployment targeting the configured handler namespace
    pub fn new(client: Client, env: OperatorEnvironment) -> Self {
        Self {
            api: Api::namespaced(client, &env.handler_namespace),
            env,
        }
    }

    fn handler_daemonset(&self, nmstate: &NMState) -> DaemonSet {
        let name = format!("{}-handler", self.env.handler_prefix);
        let labels: std::collections::BTreeMap<String, String> =
            [("app".to_string(), name.clone())].into();

        DaemonSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.env.handler_namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        node_selector: nmstate.spec.node_selector.clone(),
                        host_network: Some(true),
                        containers: vec![Container {
                            name: "handler".to_string(),
                            image: Some(self.env.handler_image.clone()),
                            image_pull_policy: Some(self.env.handler_image_pull_policy.clone()),
                            env: Some(vec![
                                EnvVar {
                                    name: "NODE_NAME".to_string(),
                                    value_from: Some(EnvVarSource {
                                        field_ref: Some(ObjectFieldSelector {
                                            field_path: "spec.nodeName".to_string(),
                                            ..Default::default()
                                        }),
                                        ..Default::default()
                                    }),
                                    ..Default::default()
                                },
                                EnvVar {
                                    name: "NMSTATE_INSTANCE_NODE_LOCK_FILE".to_string(),
                                    value: Some("/var/k8s_nmstate/handler_lock".to_string()),
                                    ..Default::default()
                                },
                            ]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl HandlerDeployment for DaemonSetHandlerDeployment {
    async fn ensure_handler(&self, nmstate: &NMState) -> Result<()> {
        let daemonset = self.handler_daemonset(nmstate);
        let name = daemonset.name_any();
        self.api
            .patch(
                &name,
                &PatchParams::apply("nmstate-operator").force(),
                &Patch::Apply(&daemonset),
            )
            .await?;
        info!(daemonset = %name, "applied handler daemonset");
        Ok(())
    }
}

/// Shared state for the operator reconciler
pub struct OperatorContext {
    /// NMState store access
    pub nmstates: Arc<dyn NmstateClient>,
    /// Handler workload management
    pub deployment: Arc<dyn HandlerDeployment>,
}

/// Reconcile the NMState singleton into the handler workloads
#[instrument(skip(nmstate, ctx), fields(nmstate = %nmstate.name_any()))]
pub async fn reconcile(nmstate: Arc<NMState>, ctx: Arc<OperatorContext>) -> Result<Action> {
    let name = nmstate.name_any();
    info!("reconciling nmstate");

    let mut instances = ctx.nmstates.list().await?;
    if instances.is_empty() {
        // Deleted after the event; the handler workloads are garbage
        // collected with their owner.
        return Ok(Action::await_change());
    }

    // Only one instance is honored: the oldest by creation time.
    instances.sort_by_key(|i| i.metadata.creation_timestamp.as_ref().map(|t| t.0));
    if instances[0].name_any() != name {
        warn!("ignoring NMState instance because an older one exists");
        ctx.nmstates.delete(&name).await?;
        return Ok(Action::await_change());
    }

    ctx.deployment.ensure_handler(&nmstate).await?;
    debug!("reconcile complete");
    Ok(Action::await_change())
}

/// Error policy: requeue with a flat delay
pub fn error_policy(nmstate: Arc<NMState>, error: &Error, _ctx: Arc<OperatorContext>) -> Action {
    error!(nmstate = %nmstate.name_any(), %error, "reconciliation failed");
    Action::requeue(Duration::from_secs(5))
}

/// Run the operator controller
pub async fn run(client: Client, ctx: Arc<OperatorContext>) -> Result<()> {
    let nmstates: Api<NMState> = Api::all(client);

    Controller::new(nmstates, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(nmstate = %object.name, "reconciliation completed"),
                Err(error) => error!(%error, "reconciliation error"),
            }
        })
        .await;

    Ok(())
}
