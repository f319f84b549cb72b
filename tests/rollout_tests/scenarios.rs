//! Rollout scenarios: concurrent handlers, one shared policy

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use knmstate::controller::policy::{reconcile, NODE_RUNNING_UPDATE_RETRY_TIME};
use knmstate::crd::types::{ConditionStatus, ConditionType, IntOrPercent, State};
use knmstate::crd::NodeNetworkConfigurationPolicySpec;
use kube::runtime::controller::Action;

use super::fake::{wait_for, FakeCluster, Gate, ScriptedEngine};

const POLICY: &str = "default-bridge";
const WORKER: &[(&str, &str)] = &[("node-role.kubernetes.io/worker", "")];

fn bridge_spec(max_unavailable: Option<IntOrPercent>) -> NodeNetworkConfigurationPolicySpec {
    NodeNetworkConfigurationPolicySpec {
        desired_state: State::from_yaml(
            r#"
interfaces:
- name: br1
  type: linux-bridge
  state: up
  bridge:
    port:
    - name: eth1
"#,
        )
        .unwrap(),
        node_selector: WORKER
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        max_unavailable,
    }
}

fn enactment_status(
    cluster: &FakeCluster,
    key: &str,
    type_: ConditionType,
) -> Option<ConditionStatus> {
    cluster
        .enactment(key)
        .and_then(|e| e.conditions().status_of(type_))
}

fn policy_condition(cluster: &FakeCluster, type_: ConditionType) -> Option<ConditionStatus> {
    cluster
        .policy(POLICY)
        .status
        .and_then(|s| s.conditions.find(type_).map(|c| c.status))
}

/// S1: three nodes, 50% budget. Two nodes enter Progressing together, the
/// third waits as Pending, then follows once capacity frees up. The policy
/// ends Available with the budget fully returned.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s1_happy_path_three_nodes_half_budget() {
    let cluster = FakeCluster::new();
    for node in ["node01", "node02", "node03"] {
        cluster.add_node(node, WORKER);
    }
    cluster.add_policy(POLICY, bridge_spec(None)); // default "50%" of 3 -> 2

    let started = Arc::new(AtomicUsize::new(0));
    let gate = Gate::new();

    let mut handles = Vec::new();
    for node in ["node01", "node02", "node03"] {
        let ctx = ctx_clone(&cluster, node, &gate, &started);
        let policy = Arc::new(cluster.policy(POLICY));
        handles.push((node, tokio::spawn(reconcile(policy, ctx))));
    }

    // Two slots, three claimants: exactly two applies start.
    wait_for("two applies in flight", || started.load(Ordering::SeqCst) == 2).await;

    // The third handler observed saturation and parked as Pending.
    wait_for("one enactment pending", || {
        ["node01", "node02", "node03"].iter().any(|node| {
            enactment_status(&cluster, &format!("{node}.{POLICY}"), ConditionType::Pending)
                == Some(ConditionStatus::True)
        })
    })
    .await;
    assert_eq!(cluster.unavailable_count(POLICY), 2);

    // Let the two in-flight applies finish and verify.
    gate.open();

    let mut pending_node = None;
    for (node, handle) in handles {
        let action = handle.await.unwrap().unwrap();
        if action == Action::requeue(NODE_RUNNING_UPDATE_RETRY_TIME) {
            pending_node = Some(node);
        }
    }
    let pending_node = pending_node.expect("one handler must have parked as Pending");

    wait_for("budget returned", || cluster.unavailable_count(POLICY) == 0).await;

    // The queue delivers the parked handler's retry after 5s; run it now.
    let ctx = cluster.handler_context(
        pending_node,
        Arc::new(ScriptedEngine::succeeding(started.clone())),
    );
    let action = reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
    assert_eq!(action, Action::await_change());

    for node in ["node01", "node02", "node03"] {
        assert_eq!(
            enactment_status(&cluster, &format!("{node}.{POLICY}"), ConditionType::Available),
            Some(ConditionStatus::True),
            "{node} must be configured"
        );
    }
    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));
    assert_eq!(cluster.unavailable_count(POLICY), 0);
    assert_eq!(
        cluster.max_observed_unavailable(),
        2,
        "the budget was used but never exceeded"
    );
}

// Handler context with a gated engine wired to a shared apply counter.
fn ctx_clone(
    cluster: &FakeCluster,
    node: &str,
    gate: &Gate,
    started: &Arc<AtomicUsize>,
) -> Arc<knmstate::controller::policy::Context> {
    cluster.handler_context(
        node,
        Arc::new(ScriptedEngine::gated(gate.clone(), started.clone())),
    )
}

/// S2: the engine fails on one node. Its enactment reports Failing with the
/// engine message; the siblings abort without touching their hosts; the
/// policy degrades.
#[tokio::test]
async fn s2_one_node_fails_siblings_abort() {
    let cluster = FakeCluster::new();
    for node in ["node01", "node02", "node03"] {
        cluster.add_node(node, WORKER);
    }
    cluster.add_policy(POLICY, bridge_spec(None));

    let failing_started = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context(
        "node02",
        Arc::new(ScriptedEngine::failing(
            "invalid bridge state",
            failing_started.clone(),
        )),
    );
    let action = reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
    assert_eq!(action, Action::await_change(), "engine failures are not retried");
    assert_eq!(
        enactment_status(&cluster, &format!("node02.{POLICY}"), ConditionType::Failing),
        Some(ConditionStatus::True)
    );
    let message = cluster
        .enactment(&format!("node02.{POLICY}"))
        .unwrap()
        .conditions()
        .find(ConditionType::Failing)
        .unwrap()
        .message
        .clone();
    assert!(message.contains("invalid bridge state"), "message: {message}");

    // The siblings detect the failure through the abort gate.
    for node in ["node01", "node03"] {
        let started = Arc::new(AtomicUsize::new(0));
        let ctx = cluster.handler_context(node, Arc::new(ScriptedEngine::succeeding(started.clone())));
        reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

        assert_eq!(
            enactment_status(&cluster, &format!("{node}.{POLICY}"), ConditionType::Aborted),
            Some(ConditionStatus::True),
            "{node} must abort"
        );
        assert_eq!(started.load(Ordering::SeqCst), 0, "{node} must not touch the host");
    }

    assert_eq!(policy_condition(&cluster, ConditionType::Degraded), Some(ConditionStatus::True));
    assert_eq!(cluster.unavailable_count(POLICY), 0);
}

/// S3: a node's label is removed. Its enactment flips to NotMatching, the
/// counter excludes it, and the policy stays Available on the remaining
/// nodes.
#[tokio::test]
async fn s3_selector_update_unmatches_node() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_node("node02", WORKER);
    cluster.add_policy(POLICY, bridge_spec(Some(IntOrPercent::Int(2))));

    for node in ["node01", "node02"] {
        let started = Arc::new(AtomicUsize::new(0));
        let ctx = cluster.handler_context(node, Arc::new(ScriptedEngine::succeeding(started)));
        reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
    }
    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));

    // The label change re-enqueues every policy on that node.
    cluster.set_node_labels("node01", &[]);
    let started = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context("node01", Arc::new(ScriptedEngine::succeeding(started.clone())));
    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

    assert_eq!(
        enactment_status(&cluster, &format!("node01.{POLICY}"), ConditionType::Matching),
        Some(ConditionStatus::False)
    );
    assert_eq!(started.load(Ordering::SeqCst), 0, "unmatched nodes never apply");

    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));
    let message = cluster
        .policy(POLICY)
        .status
        .unwrap()
        .conditions
        .find(ConditionType::Available)
        .unwrap()
        .message
        .clone();
    assert!(message.contains("1/1"), "message: {message}");
}

/// S4: a spec update bumps the generation. Reports from generation 1 are
/// treated as stale, the aggregator says Progressing until every node
/// reports for generation 2, then the policy is Available again.
#[tokio::test]
async fn s4_generation_bump_resets_and_progresses() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_node("node02", WORKER);
    cluster.add_policy(POLICY, bridge_spec(Some(IntOrPercent::Int(2))));

    for node in ["node01", "node02"] {
        let started = Arc::new(AtomicUsize::new(0));
        let ctx = cluster.handler_context(node, Arc::new(ScriptedEngine::succeeding(started)));
        reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
    }

    cluster.bump_policy_generation(POLICY);

    // Only node01 has reconciled the new generation so far.
    let started = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context("node01", Arc::new(ScriptedEngine::succeeding(started)));
    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

    let enactment = cluster.enactment(&format!("node01.{POLICY}")).unwrap();
    assert_eq!(enactment.policy_generation(), 2);
    assert_eq!(
        enactment.conditions().status_of(ConditionType::Available),
        Some(ConditionStatus::True)
    );

    // node02's lingering generation-1 report keeps the rollout Progressing,
    // never prematurely Available or Degraded.
    assert_eq!(
        policy_condition(&cluster, ConditionType::Progressing),
        Some(ConditionStatus::True)
    );
    assert_ne!(
        policy_condition(&cluster, ConditionType::Available),
        Some(ConditionStatus::True)
    );

    let started = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context("node02", Arc::new(ScriptedEngine::succeeding(started)));
    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));
}

/// S5: two handlers race at the saturation boundary with a budget of one.
/// Exactly one proceeds to apply; the other re-reads, sees saturation and
/// parks as Pending. After the winner finishes, the loser follows.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s5_conflict_on_increment_at_saturation_boundary() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_node("node02", WORKER);
    cluster.add_policy(POLICY, bridge_spec(Some(IntOrPercent::Int(1))));

    let started = Arc::new(AtomicUsize::new(0));
    let gate = Gate::new();

    let mut handles = Vec::new();
    for node in ["node01", "node02"] {
        let ctx = ctx_clone(&cluster, node, &gate, &started);
        let policy = Arc::new(cluster.policy(POLICY));
        handles.push((node, tokio::spawn(reconcile(policy, ctx))));
    }

    wait_for("exactly one apply in flight", || {
        started.load(Ordering::SeqCst) == 1
    })
    .await;
    wait_for("the loser parks as Pending", || {
        ["node01", "node02"].iter().any(|node| {
            enactment_status(&cluster, &format!("{node}.{POLICY}"), ConditionType::Pending)
                == Some(ConditionStatus::True)
        })
    })
    .await;
    assert_eq!(cluster.unavailable_count(POLICY), 1);

    gate.open();
    let mut pending_node = None;
    for (node, handle) in handles {
        let action = handle.await.unwrap().unwrap();
        if action == Action::requeue(NODE_RUNNING_UPDATE_RETRY_TIME) {
            pending_node = Some(node);
        }
    }
    let pending_node = pending_node.expect("one handler must have parked");

    let ctx = cluster.handler_context(
        pending_node,
        Arc::new(ScriptedEngine::succeeding(started.clone())),
    );
    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

    assert_eq!(started.load(Ordering::SeqCst), 2, "both nodes applied exactly once");
    assert_eq!(cluster.max_observed_unavailable(), 1, "budget never exceeded");
    assert_eq!(cluster.unavailable_count(POLICY), 0);
    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));
}

/// S6: the handler crashes mid-apply while holding a budget slot. On
/// restart, the Progressing snapshot blocks a second claim, the apply
/// re-runs, and the original slot is released at the end.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_restart_mid_apply_does_not_double_claim() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_policy(POLICY, bridge_spec(Some(IntOrPercent::Int(1))));

    let started = Arc::new(AtomicUsize::new(0));
    let gate = Gate::new();
    let ctx = ctx_clone(&cluster, "node01", &gate, &started);
    let handle = tokio::spawn(reconcile(Arc::new(cluster.policy(POLICY)), ctx));

    wait_for("apply in flight", || started.load(Ordering::SeqCst) == 1).await;
    assert_eq!(cluster.unavailable_count(POLICY), 1);
    assert_eq!(
        enactment_status(&cluster, &format!("node01.{POLICY}"), ConditionType::Progressing),
        Some(ConditionStatus::True)
    );

    // Crash: the process dies between increment and decrement.
    handle.abort();
    let _ = handle.await;
    assert_eq!(cluster.unavailable_count(POLICY), 1, "the slot leaked across the crash");

    // Restart: same node, fresh process, engine healthy again.
    let restarted = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context("node01", Arc::new(ScriptedEngine::succeeding(restarted.clone())));
    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();

    assert_eq!(restarted.load(Ordering::SeqCst), 1, "the apply re-ran");
    assert_eq!(
        cluster.max_observed_unavailable(),
        1,
        "the hysteresis prevents a second claim"
    );
    assert_eq!(cluster.unavailable_count(POLICY), 0, "the leaked slot was released");
    assert_eq!(
        enactment_status(&cluster, &format!("node01.{POLICY}"), ConditionType::Available),
        Some(ConditionStatus::True)
    );
}

/// Idempotence: re-applying an unchanged policy converges to Available again
/// without ever holding more than one budget slot.
#[tokio::test]
async fn reapplying_same_policy_is_idempotent() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_policy(POLICY, bridge_spec(None));

    for _ in 0..2 {
        let started = Arc::new(AtomicUsize::new(0));
        let ctx = cluster.handler_context("node01", Arc::new(ScriptedEngine::succeeding(started)));
        let action = reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    assert_eq!(policy_condition(&cluster, ConditionType::Available), Some(ConditionStatus::True));
    assert_eq!(cluster.unavailable_count(POLICY), 0);
    assert_eq!(cluster.max_observed_unavailable(), 1);
}

/// A second policy event for the same generation leaves the enactment's
/// report intact (no spurious reset).
#[tokio::test]
async fn same_generation_requeue_keeps_conditions() {
    let cluster = FakeCluster::new();
    cluster.add_node("node01", WORKER);
    cluster.add_policy(POLICY, bridge_spec(None));

    let started = Arc::new(AtomicUsize::new(0));
    let ctx = cluster.handler_context("node01", Arc::new(ScriptedEngine::succeeding(started.clone())));
    reconcile(Arc::new(cluster.policy(POLICY)), ctx.clone()).await.unwrap();

    let first = cluster.enactment(&format!("node01.{POLICY}")).unwrap();
    assert_eq!(first.policy_generation(), 1);

    reconcile(Arc::new(cluster.policy(POLICY)), ctx).await.unwrap();
    let second = cluster.enactment(&format!("node01.{POLICY}")).unwrap();
    assert_eq!(
        second.conditions().status_of(ConditionType::Available),
        Some(ConditionStatus::True)
    );
}
