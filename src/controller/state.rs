//! NodeNetworkState reporter
//!
//! Keeps this node's NNS in step with the host: the object is ensured at
//! startup (owned by the node), refreshed on a fixed interval, and refreshed
//! early whenever the policy reconciler bumps the trigger label after an
//! apply.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::types::{ConditionReason, ConditionStatus, ConditionType};
use crate::crd::NodeNetworkState;
use crate::engine::filter::{filter_out, DEFAULT_INTERFACES_FILTER};
use crate::engine::NetworkStateEngine;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::store::{not_found_error, NodeClient, NodeClientImpl, StateClient, StateClientImpl};
use crate::{Error, Result};

/// Pause between successful host-state reports
pub const STATE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state for the NNS reporter on one node
pub struct StateContext {
    /// NodeNetworkState store access
    pub states: Arc<dyn StateClient>,
    /// Node store access (for ownership at creation)
    pub nodes: Arc<dyn NodeClient>,
    /// The external network-state engine
    pub engine: Arc<dyn NetworkStateEngine>,
    /// The node this handler owns
    pub node_name: String,
}

impl StateContext {
    /// Production context wrapping the cluster client
    pub fn new(client: Client, node_name: String, engine: Arc<dyn NetworkStateEngine>) -> Self {
        Self {
            states: Arc::new(StateClientImpl::new(client.clone())),
            nodes: Arc::new(NodeClientImpl::new(client)),
            engine,
            node_name,
        }
    }
}

/// Create this node's NNS if it does not exist yet. Called once at handler
/// startup, before the controllers run.
pub async fn ensure_state_exists(ctx: &StateContext) -> Result<()> {
    if ctx.states.get(&ctx.node_name).await?.is_some() {
        return Ok(());
    }

    let node = ctx
        .nodes
        .get(&ctx.node_name)
        .await?
        .ok_or_else(|| not_found_error("nodes", &ctx.node_name))?;

    info!(node = %ctx.node_name, "creating NodeNetworkState");
    let nns = NodeNetworkState::for_node(&node);
    match ctx.states.create(&nns).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Refresh the NNS status from the engine's view of the host
#[instrument(skip(nns, ctx), fields(node = %ctx.node_name))]
pub async fn reconcile(nns: Arc<NodeNetworkState>, ctx: Arc<StateContext>) -> Result<Action> {
    if nns.name_any() != ctx.node_name {
        // Another node's report; not ours to write.
        return Ok(Action::await_change());
    }

    debug!("refreshing node network state");
    let observation = ctx.engine.show().await;

    let versions = match &observation {
        Ok(_) => ctx.engine.versions().await.unwrap_or_default(),
        Err(_) => Default::default(),
    };

    let report = match observation {
        Ok(current) => Ok(filter_out(&current, DEFAULT_INTERFACES_FILTER)?),
        Err(e) => Err(e),
    };

    let ctx_ref = ctx.as_ref();
    write_status(ctx_ref, report, versions).await?;
    Ok(Action::requeue(STATE_REFRESH_INTERVAL))
}

async fn write_status(
    ctx: &StateContext,
    report: std::result::Result<crate::crd::types::State, Error>,
    versions: crate::engine::EngineVersions,
) -> Result<()> {
    let report = &report;
    let versions = &versions;
    retry_on_conflict(
        &RetryConfig::conflict_default(),
        "node_network_state_update",
        move || async move {
            let mut nns = ctx
                .states
                .get(&ctx.node_name)
                .await?
                .ok_or_else(|| not_found_error("nodenetworkstates", &ctx.node_name))?;

            let mut status = nns.status.take().unwrap_or_default();
            match report {
                Ok(current) => {
                    status.current_state = current.clone();
                    status.last_successful_update_time = Some(Utc::now());
                    status.handler_nmstate_version = versions.nmstate.clone();
                    status.host_network_manager_version = versions.network_manager.clone();
                    status.conditions.set(
                        ConditionType::Available,
                        ConditionStatus::True,
                        ConditionReason::SuccessfullyConfigured,
                        "successfully updated node network state",
                    );
                    status.conditions.set(
                        ConditionType::Failing,
                        ConditionStatus::False,
                        ConditionReason::SuccessfullyConfigured,
                        "",
                    );
                }
                Err(e) => {
                    status.conditions.set(
                        ConditionType::Failing,
                        ConditionStatus::True,
                        ConditionReason::FailedToConfigure,
                        format!("failed to read node network state: {e}"),
                    );
                    status.conditions.set(
                        ConditionType::Available,
                        ConditionStatus::False,
                        ConditionReason::FailedToConfigure,
                        "",
                    );
                }
            }
            nns.status = Some(status);
            ctx.states.replace_status(&nns).await
        },
    )
    .await
}

/// Error policy for the reporter: retry on the regular interval
pub fn error_policy(nns: Arc<NodeNetworkState>, error: &Error, _ctx: Arc<StateContext>) -> Action {
    warn!(nns = %nns.name_any(), %error, "node network state refresh failed");
    Action::requeue(STATE_REFRESH_INTERVAL)
}

/// Run the NNS controller for this node. Trigger-label bumps arrive as watch
/// events; the steady-state interval comes from the reconcile requeue.
pub async fn run(client: Client, ctx: Arc<StateContext>) -> Result<()> {
    let states: Api<NodeNetworkState> = Api::all(client);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", ctx.node_name));

    Controller::new(states, config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(nns = %object.name, "state refresh completed"),
                Err(error) => error!(%error, "state refresh error"),
            }
        })
        .await;

    Ok(())
}
