//! NodeNetworkConfigurationPolicy reconciler
//!
//! The per-node rollout state machine. Every handler runs this loop against
//! the same policies; coordination happens only through the policy status
//! (the maxUnavailable budget) and the enactment objects (the abort gate).
//!
//! Flow for one policy event: evaluate the selector, initialize the
//! enactment, bail out if a sibling already failed, claim a budget slot,
//! hand the desired state to the engine, report the verdict, release the
//! slot, and finally re-aggregate the policy status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::reflector;
use kube::runtime::watcher;
use kube::runtime::{predicates, Controller, WatchStreamExt};
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::capacity;
use crate::crd::types::{ConditionList, LabelMap};
use crate::crd::{
    enactment_key, NodeNetworkConfigurationPolicy, FORCE_REFRESH_LABEL,
};
use crate::enactment::{self, conditions, counter, EnactmentClient, EnactmentClientImpl};
use crate::engine::defaults::apply_default_vlan_filtering;
use crate::engine::NetworkStateEngine;
use crate::policyconditions;
use crate::predicates::NodeLabelChanges;
use crate::selectors;
use crate::store::{
    not_found_error, NodeClient, NodeClientImpl, PolicyClient, PolicyClientImpl, StateClient,
    StateClientImpl,
};
use crate::{Error, Result};

/// Requeue delay while a policy's unavailable budget is saturated
pub const NODE_RUNNING_UPDATE_RETRY_TIME: Duration = Duration::from_secs(5);

/// Shared state for the policy reconciler on one node
pub struct Context {
    /// Policy store access
    pub policies: Arc<dyn PolicyClient>,
    /// Enactment store access
    pub enactments: Arc<dyn EnactmentClient>,
    /// Node store access
    pub nodes: Arc<dyn NodeClient>,
    /// NodeNetworkState store access (refresh trigger)
    pub states: Arc<dyn StateClient>,
    /// The external network-state engine
    pub engine: Arc<dyn NetworkStateEngine>,
    /// The node this handler owns
    pub node_name: String,
}

impl Context {
    /// Production context wrapping the cluster client
    pub fn new(client: Client, node_name: String, engine: Arc<dyn NetworkStateEngine>) -> Self {
        Self {
            policies: Arc::new(PolicyClientImpl::new(client.clone())),
            enactments: Arc::new(EnactmentClientImpl::new(client.clone())),
            nodes: Arc::new(NodeClientImpl::new(client.clone())),
            states: Arc::new(StateClientImpl::new(client)),
            engine,
            node_name,
        }
    }

    /// Context with custom store implementations, for tests
    pub fn with_clients(
        policies: Arc<dyn PolicyClient>,
        enactments: Arc<dyn EnactmentClient>,
        nodes: Arc<dyn NodeClient>,
        states: Arc<dyn StateClient>,
        engine: Arc<dyn NetworkStateEngine>,
        node_name: String,
    ) -> Self {
        Self {
            policies,
            enactments,
            nodes,
            states,
            engine,
            node_name,
        }
    }
}

/// Reconcile one policy on this node.
///
/// The policy status aggregation runs after the body on every path, so
/// whatever this reconcile wrote to the enactment is reflected on the policy
/// before the next event.
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any(), node = %ctx.node_name))]
pub async fn reconcile(
    policy: Arc<NodeNetworkConfigurationPolicy>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = policy.name_any();
    info!("reconciling policy");

    // Work from a fresh read; the watch event may be stale.
    let policy = match ctx.policies.get(&name).await? {
        Some(policy) => policy,
        None => {
            // Deleted after the event fired; owned objects are garbage
            // collected.
            debug!("policy deleted, nothing to do");
            return Ok(Action::await_change());
        }
    };

    if let Err(error) = policyconditions::reset(ctx.policies.as_ref(), &name).await {
        warn!(error = %error, "failed resetting policy conditions");
    }

    let result = reconcile_policy(&policy, &ctx).await;

    if let Err(error) = policyconditions::update(
        ctx.policies.as_ref(),
        ctx.enactments.as_ref(),
        ctx.nodes.as_ref(),
        &name,
    )
    .await
    {
        warn!(error = %error, "failed updating policy conditions");
    }

    result
}

async fn reconcile_policy(
    policy: &NodeNetworkConfigurationPolicy,
    ctx: &Context,
) -> Result<Action> {
    let policy_name = policy.name_any();
    let key = enactment_key(&ctx.node_name, &policy_name);

    // Selecting
    let unmatched =
        match selectors::unmatched_node_labels(ctx.nodes.as_ref(), policy, &ctx.node_name).await {
            Ok(unmatched) => unmatched,
            Err(err) => {
                notify_selector_failure(ctx, &key, &err).await;
                return Err(err);
            }
        };
    if !unmatched.is_empty() {
        info!(?unmatched, "policy node selectors do not match node");
        // Only matching nodes own an enactment; flip an existing one to
        // NotMatching, never create one just to record the mismatch.
        if ctx.enactments.get(&key).await?.is_some() {
            let message = format!("Unmatched node labels: {}", format_labels(&unmatched));
            notify(ctx, &key, |c| conditions::set_not_matching(c, message.clone())).await?;
        }
        return Ok(Action::await_change());
    }

    // Initializing; the enactment is owned by the node, so the node object
    // itself is needed here.
    let node = ctx
        .nodes
        .get(&ctx.node_name)
        .await?
        .ok_or_else(|| not_found_error("nodes", &ctx.node_name))?;
    let desired_state = apply_default_vlan_filtering(&policy.spec.desired_state)?;
    let (enactment, existed) =
        enactment::create_if_absent(ctx.enactments.as_ref(), &node, policy).await?;
    let previous_conditions = enactment.conditions();

    if existed && enactment.policy_generation() != policy.generation() {
        enactment::reset(ctx.enactments.as_ref(), &key).await?;
    }

    let generation = policy.generation();
    enactment::update_status(ctx.enactments.as_ref(), &key, |status| {
        status.desired_state = desired_state.clone();
        status.policy_generation = generation;
    })
    .await?;

    // Matching
    notify(ctx, &key, |c| conditions::set_matching(c)).await?;

    // Abort gate: a sibling failure for this generation stops the rollout
    // here, before any host mutation.
    let siblings = ctx.enactments.list_for_policy(&policy_name).await?;
    let counts = counter::count(&siblings, generation);
    if counts.failing.true_count() > 0 {
        warn!("policy has failing enactments, aborting");
        notify(ctx, &key, |c| {
            conditions::set_aborted(c, "policy has failing enactments, aborting")
        })
        .await?;
        return Ok(Action::await_change());
    }

    // Admitting
    if capacity::should_increment_unavailable_node_count(&previous_conditions, policy) {
        match capacity::increment_unavailable_node_count(
            ctx.policies.as_ref(),
            ctx.nodes.as_ref(),
            &policy_name,
        )
        .await
        {
            Ok(()) => {}
            Err(err) if err.is_saturation() => {
                info!(%err, "waiting for unavailable budget");
                let message = err.to_string();
                notify(ctx, &key, |c| conditions::set_pending(c, message.clone())).await?;
                return Ok(Action::requeue(NODE_RUNNING_UPDATE_RETRY_TIME));
            }
            Err(err) => return Err(err),
        }
    }

    // Applying and reporting; the budget slot is released on every path out.
    let result = apply_and_report(policy, ctx, &key, &desired_state).await;
    capacity::decrement_unavailable_node_count(ctx.policies.as_ref(), &policy_name).await;
    result
}

async fn apply_and_report(
    policy: &NodeNetworkConfigurationPolicy,
    ctx: &Context,
    key: &str,
    desired_state: &crate::crd::types::State,
) -> Result<Action> {
    notify(ctx, key, |c| {
        conditions::set_progressing(c, "Applying desired network state")
    })
    .await?;

    match ctx.engine.apply(desired_state).await {
        Ok(output) => {
            debug!(engine_output = %output, "desired state applied");
            notify(ctx, key, |c| {
                conditions::set_success(c, "successfully reconciled")
            })
            .await?;
            force_nns_refresh(ctx).await;
            Ok(Action::await_change())
        }
        Err(err) => {
            // The engine already rolled the host back. This is terminal for
            // the enactment until the user changes the policy; no automatic
            // retry.
            let message = format!(
                "error reconciling NodeNetworkConfigurationPolicy {} at desired state apply: {err}",
                policy.name_any()
            );
            error!(%message, "rolling back network configuration, manual intervention needed");
            notify(ctx, key, |c| {
                conditions::set_failed_to_configure(c, message.clone())
            })
            .await?;
            Ok(Action::await_change())
        }
    }
}

async fn notify<F>(ctx: &Context, key: &str, setter: F) -> Result<()>
where
    F: Fn(&mut ConditionList) + Send + Sync,
{
    enactment::update_status(ctx.enactments.as_ref(), key, |status| {
        setter(&mut status.conditions)
    })
    .await
}

async fn notify_selector_failure(ctx: &Context, key: &str, err: &Error) {
    let exists = matches!(ctx.enactments.get(key).await, Ok(Some(_)));
    if !exists {
        return;
    }
    let message = format!("failure checking node selectors: {err}");
    if let Err(error) = notify(ctx, key, |c| {
        conditions::set_node_selector_failure(c, message.clone())
    })
    .await
    {
        warn!(%error, "failed reporting node selector failure");
    }
}

/// Bump the NNS refresh-trigger label so the state reporter re-reads the
/// host right away instead of waiting out its interval. Best effort: a
/// failed bump only delays the refresh.
async fn force_nns_refresh(ctx: &Context) {
    let mut nns = match ctx.states.get(&ctx.node_name).await {
        Ok(Some(nns)) => nns,
        Ok(None) => {
            warn!("no NodeNetworkState to force refresh, it will refresh on its regular period");
            return;
        }
        Err(error) => {
            warn!(%error, "failed retrieving NodeNetworkState to force refresh");
            return;
        }
    };

    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string();
    nns.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(FORCE_REFRESH_LABEL.to_string(), stamp);

    if let Err(error) = ctx.states.replace(&nns).await {
        warn!(%error, "failed forcing NodeNetworkState refresh");
    }
}

fn format_labels(labels: &LabelMap) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error policy: transient store errors requeue with a flat delay; the
/// enactment already carries anything worth reporting.
pub fn error_policy(
    policy: Arc<NodeNetworkConfigurationPolicy>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        policy = %policy.name_any(),
        %error,
        "reconciliation failed"
    );
    Action::requeue(NODE_RUNNING_UPDATE_RETRY_TIME)
}

/// Run the policy controller with both watches wired in:
/// - policy events filtered to creations and generation changes, and
/// - this node's label changes fanning out to every policy.
pub async fn run(client: Client, ctx: Arc<Context>) -> Result<()> {
    let policies: Api<NodeNetworkConfigurationPolicy> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client);

    let (reader, writer) = reflector::store();
    let policy_events = watcher(policies, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    let node_config =
        watcher::Config::default().fields(&format!("metadata.name={}", ctx.node_name));
    let mut label_filter = NodeLabelChanges::new(ctx.node_name.clone());
    let node_label_changes = watcher(nodes, node_config)
        .applied_objects()
        .filter_map(|event| futures::future::ready(event.ok()))
        .filter_map(move |node| futures::future::ready(label_filter.observe(&node).then_some(())));

    // `reconcile_all_on` requires its trigger stream to be `Sync`, but the
    // underlying kube watcher stream is not. Forward it through an
    // unbounded channel, whose receiver is `Sync` regardless of the stream
    // feeding it, to satisfy that bound without changing its behavior.
    let (node_label_tx, node_label_rx) = futures::channel::mpsc::unbounded();
    tokio::spawn(node_label_changes.map(Ok).forward(node_label_tx));

    Controller::for_stream(policy_events, reader)
        .reconcile_all_on(node_label_rx)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(policy = %object.name, "reconciliation completed"),
                Err(error) => error!(%error, "reconciliation error"),
            }
        })
        .await;

    Ok(())
}
