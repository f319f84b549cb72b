//! Policy-level condition aggregation
//!
//! Folds the enactment counter output back into a single policy condition
//! set (Available / Degraded / Progressing) with a short human message. Every
//! reconcile runs the update after its body (success, failure or back-off),
//! so the policy status always reflects the latest per-node reports.

use tracing::{debug, instrument};

use crate::crd::types::{ConditionList, ConditionReason, ConditionStatus, ConditionType};
use crate::enactment::counter::{count, ConditionCount};
use crate::enactment::EnactmentClient;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::selectors::matching_node_count;
use crate::store::{NodeClient, PolicyClient};
use crate::Result;

use ConditionReason as Reason;
use ConditionStatus::{False, True, Unknown};
use ConditionType as Type;

/// Decide the policy condition vector from the counter output.
///
/// Precedence: any current-generation failure or abort degrades the policy;
/// any in-flight or unknown verdict keeps it progressing; only a full set of
/// Available=True reports makes it available.
pub fn aggregate(counts: &ConditionCount, matching_node_count: usize) -> (ConditionList, String) {
    let mut conditions = ConditionList::new();

    let failed = counts.failing.true_count() + counts.aborted.true_count();
    let configured = counts.available.true_count();
    let progressing = counts.progressing.true_count();
    let pending = counts.pending.true_count();

    if failed > 0 {
        let message = format!(
            "{failed}/{matching_node_count} nodes failed to configure"
        );
        conditions.set(Type::Degraded, True, Reason::FailedToConfigure, message.clone());
        conditions.set(Type::Available, False, Reason::FailedToConfigure, "");
        conditions.set(Type::Progressing, False, Reason::FailedToConfigure, "");
        return (conditions, message);
    }

    let verdict_pending =
        counts.available.unknown_count() > 0 || counts.failing.unknown_count() > 0;
    if progressing > 0 || verdict_pending {
        let message = format!(
            "{configured}/{matching_node_count} nodes configured; {} progressing",
            progressing.max(
                matching_node_count.saturating_sub(configured + pending)
            )
        );
        conditions.set(Type::Progressing, True, Reason::ConfigurationProgressing, message.clone());
        conditions.set(Type::Available, Unknown, Reason::ConfigurationProgressing, "");
        conditions.set(Type::Degraded, Unknown, Reason::ConfigurationProgressing, "");
        return (conditions, message);
    }

    if configured == matching_node_count {
        let message = format!(
            "{configured}/{matching_node_count} nodes successfully configured"
        );
        conditions.set(Type::Available, True, Reason::SuccessfullyConfigured, message.clone());
        conditions.set(Type::Degraded, False, Reason::SuccessfullyConfigured, "");
        conditions.set(Type::Progressing, False, Reason::SuccessfullyConfigured, "");
        return (conditions, message);
    }

    // No failures, nothing in flight, not everyone configured: nodes are
    // waiting on the budget. The rollout is still progressing.
    let message = format!(
        "{configured}/{matching_node_count} nodes configured; {pending} pending"
    );
    conditions.set(Type::Progressing, True, Reason::ConfigurationProgressing, message.clone());
    conditions.set(Type::Available, Unknown, Reason::ConfigurationProgressing, "");
    conditions.set(Type::Degraded, Unknown, Reason::ConfigurationProgressing, "");
    (conditions, message)
}

/// Reset the policy conditions to Unknown at the start of a reconcile
pub async fn reset(policies: &dyn PolicyClient, policy_name: &str) -> Result<()> {
    write_conditions(policies, policy_name, |conditions| {
        conditions.set(Type::Available, Unknown, Reason::ConfigurationProgressing, "");
        conditions.set(Type::Degraded, Unknown, Reason::ConfigurationProgressing, "");
        conditions.set(Type::Progressing, Unknown, Reason::ConfigurationProgressing, "");
    })
    .await
}

/// Recount enactments and rewrite the policy condition set
#[instrument(skip(policies, enactments, nodes))]
pub async fn update(
    policies: &dyn PolicyClient,
    enactments: &dyn EnactmentClient,
    nodes: &dyn NodeClient,
    policy_name: &str,
) -> Result<()> {
    let policy = match policies.get(policy_name).await? {
        Some(policy) => policy,
        // Deleted mid-reconcile; owned enactments are garbage collected.
        None => return Ok(()),
    };

    let enactment_list = enactments.list_for_policy(policy_name).await?;
    let counts = count(&enactment_list, policy.generation());
    let matching = matching_node_count(nodes, &policy.spec.node_selector).await?;

    let (conditions, message) = aggregate(&counts, matching);
    debug!(policy = %policy_name, message = %message, "aggregated policy conditions");

    write_conditions(policies, policy_name, move |existing| {
        *existing = conditions.clone();
    })
    .await
}

async fn write_conditions<F>(policies: &dyn PolicyClient, policy_name: &str, mutate: F) -> Result<()>
where
    F: Fn(&mut ConditionList) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(
        &RetryConfig::conflict_default(),
        "policy_conditions_update",
        move || async move {
            let mut policy = match policies.get(policy_name).await? {
                Some(policy) => policy,
                None => return Ok(()),
            };
            let mut status = policy.status.take().unwrap_or_default();
            mutate(&mut status.conditions);
            policy.status = Some(status);
            policies.replace_status(&policy).await
        },
    )
    .await
}
