//! Capacity admission: the cluster-wide maxUnavailable gate
//!
//! Before touching the host, every handler claims a slot in the policy's
//! unavailable budget by incrementing `status.unavailableNodeCount` under
//! optimistic concurrency. Saturation is signaled (not failed) so the caller
//! can report Pending and requeue; a store version conflict means another
//! handler won the race, and the claim restarts from a fresh read.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::crd::types::{ConditionList, IntOrPercent};
use crate::crd::NodeNetworkConfigurationPolicy;
use crate::enactment::conditions::is_progressing;
use crate::engine::{DESIRED_STATE_CONFIGURATION_TIMEOUT, PROBES_TOTAL_TIMEOUT};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::selectors::matching_node_count;
use crate::store::{not_found_error, NodeClient, PolicyClient};
use crate::{Error, Result};

/// Derive the effective maxUnavailable cap for a policy.
///
/// Absent means "50%". Percentages are taken of the matching-node count and
/// rounded up. The result is clamped to the matching-node count and floored
/// to 1 so a rollout can always progress.
pub fn max_unavailable(
    policy: &NodeNetworkConfigurationPolicy,
    matching_node_count: usize,
) -> Result<i64> {
    let spec_value = policy
        .spec
        .max_unavailable
        .clone()
        .unwrap_or_default();

    let raw = match spec_value {
        IntOrPercent::Int(n) => {
            if n < 0 {
                return Err(Error::validation(format!(
                    "maxUnavailable must not be negative, got {n}"
                )));
            }
            n
        }
        IntOrPercent::Percent(s) => {
            let digits = s
                .strip_suffix('%')
                .ok_or_else(|| {
                    Error::validation(format!("maxUnavailable {s:?} is neither a count nor a percentage"))
                })?
                .trim();
            let percent: u64 = digits.parse().map_err(|_| {
                Error::validation(format!("maxUnavailable percentage {s:?} is not a number"))
            })?;
            // Round up so "50%" of 3 nodes is 2.
            ((percent as u128 * matching_node_count as u128).div_ceil(100)) as i64
        }
    };

    Ok(raw.min(matching_node_count as i64).max(1))
}

/// Whether this handler should claim a budget slot before applying.
///
/// No claim while the previous report is still Progressing (the slot from
/// before a restart is still held), and no claim when the last count change
/// is older than one full apply-plus-probe window: past that horizon any
/// prior claim has leaked or finished, and re-claiming would double-count a
/// handler that was racing at the original timestamp.
pub fn should_increment_unavailable_node_count(
    previous_conditions: &ConditionList,
    policy: &NodeNetworkConfigurationPolicy,
) -> bool {
    should_increment_at(previous_conditions, policy, Utc::now())
}

fn should_increment_at(
    previous_conditions: &ConditionList,
    policy: &NodeNetworkConfigurationPolicy,
    now: DateTime<Utc>,
) -> bool {
    if is_progressing(previous_conditions) {
        return false;
    }

    let window = chrono::Duration::from_std(
        DESIRED_STATE_CONFIGURATION_TIMEOUT + PROBES_TOTAL_TIMEOUT,
    )
    .unwrap_or_else(|_| chrono::Duration::seconds(0));

    match policy
        .status
        .as_ref()
        .and_then(|s| s.last_unavailable_node_count_update)
    {
        None => true,
        Some(last_update) => now.signed_duration_since(last_update) < window,
    }
}

/// Claim one slot of the policy's unavailable budget.
///
/// Loops on store version conflicts with a fresh read each time; signals
/// `Error::MaxUnavailableReached` when the budget is saturated.
pub async fn increment_unavailable_node_count(
    policies: &dyn PolicyClient,
    nodes: &dyn NodeClient,
    policy_name: &str,
) -> Result<()> {
    loop {
        let mut policy = policies
            .get(policy_name)
            .await?
            .ok_or_else(|| not_found_error("nodenetworkconfigurationpolicies", policy_name))?;

        let matching = matching_node_count(nodes, &policy.spec.node_selector).await?;
        let max = max_unavailable(&policy, matching)?;

        let mut status = policy.status.take().unwrap_or_default();
        if status.unavailable_node_count >= max {
            return Err(Error::MaxUnavailableReached {
                unavailable: status.unavailable_node_count,
                max,
            });
        }

        status.unavailable_node_count += 1;
        status.last_unavailable_node_count_update = Some(Utc::now());
        let claimed = status.unavailable_node_count;
        policy.status = Some(status);

        match policies.replace_status(&policy).await {
            Ok(()) => {
                info!(
                    policy = %policy_name,
                    unavailable = claimed,
                    max = max,
                    "claimed unavailable budget slot"
                );
                return Ok(());
            }
            Err(e) if e.is_conflict() => {
                debug!(policy = %policy_name, "budget claim conflicted, re-reading");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Release a claimed budget slot. Runs on every exit path after a successful
/// increment, apply failure included. Errors are logged, never propagated:
/// the reconcile outcome is already decided by the time the slot is released.
pub async fn decrement_unavailable_node_count(policies: &dyn PolicyClient, policy_name: &str) {
    let result = retry_on_conflict(
        &RetryConfig::conflict_default(),
        "decrement_unavailable_node_count",
        || async {
            let mut policy = policies
                .get(policy_name)
                .await?
                .ok_or_else(|| not_found_error("nodenetworkconfigurationpolicies", policy_name))?;

            let mut status = policy.status.take().unwrap_or_default();
            if status.unavailable_node_count <= 0 {
                return Err(Error::validation("no unavailable nodes"));
            }
            status.unavailable_node_count -= 1;
            status.last_unavailable_node_count_update = Some(Utc::now());
            policy.status = Some(status);
            policies.replace_status(&policy).await
        },
    )
    .await;

    if let Err(e) = result {
        error!(policy = %policy_name, error = %e, "error decrementing unavailableNodeCount");
    }
}
