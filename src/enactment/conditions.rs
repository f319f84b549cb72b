//! Enactment condition setters
//!
//! Each setter writes the full six-condition vector atomically so downstream
//! counting never observes a partial state. True is unique on the informative
//! axis, and Unknown only appears on Available/Failing while an apply is in
//! flight (and on Matching when the node itself cannot be read).

use crate::crd::types::{ConditionList, ConditionReason, ConditionStatus, ConditionType};

use ConditionReason as Reason;
use ConditionStatus::{False, True, Unknown};
use ConditionType as Type;

/// The node selector does not match; this node will not act on the policy.
pub fn set_not_matching(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, False, Reason::NodeSelectorNotMatching, message);
    conditions.set(Type::Pending, False, Reason::NodeSelectorNotMatching, "");
    conditions.set(Type::Progressing, False, Reason::NodeSelectorNotMatching, "");
    conditions.set(Type::Available, False, Reason::NodeSelectorNotMatching, "");
    conditions.set(Type::Failing, False, Reason::NodeSelectorNotMatching, "");
    conditions.set(Type::Aborted, False, Reason::NodeSelectorNotMatching, "");
}

/// The node object could not be read, so the selector verdict is unknown.
pub fn set_node_selector_failure(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, Unknown, Reason::NodeSelectorFailure, message);
    conditions.set(Type::Pending, False, Reason::NodeSelectorFailure, "");
    conditions.set(Type::Progressing, False, Reason::NodeSelectorFailure, "");
    conditions.set(Type::Available, False, Reason::NodeSelectorFailure, "");
    conditions.set(Type::Failing, False, Reason::NodeSelectorFailure, "");
    conditions.set(Type::Aborted, False, Reason::NodeSelectorFailure, "");
}

/// Every selector entry matches the node labels. Only asserts the Matching
/// axis; the rollout axes are written by the later setters.
pub fn set_matching(conditions: &mut ConditionList) {
    conditions.set(
        Type::Matching,
        True,
        Reason::AllSelectorsMatching,
        "All policy selectors are matching the node",
    );
}

/// The maxUnavailable budget is saturated; this node waits its turn.
pub fn set_pending(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, True, Reason::AllSelectorsMatching, "");
    conditions.set(Type::Pending, True, Reason::MaxUnavailableLimitReached, message);
    conditions.set(Type::Progressing, False, Reason::MaxUnavailableLimitReached, "");
    conditions.set(Type::Available, False, Reason::MaxUnavailableLimitReached, "");
    conditions.set(Type::Failing, False, Reason::MaxUnavailableLimitReached, "");
    conditions.set(Type::Aborted, False, Reason::MaxUnavailableLimitReached, "");
}

/// The desired state is being handed to the engine. The verdict axes stay
/// Unknown until the engine reports.
pub fn set_progressing(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, True, Reason::AllSelectorsMatching, "");
    conditions.set(Type::Pending, False, Reason::ConfigurationProgressing, "");
    conditions.set(Type::Progressing, True, Reason::ConfigurationProgressing, message);
    conditions.set(Type::Available, Unknown, Reason::ConfigurationProgressing, "");
    conditions.set(Type::Failing, Unknown, Reason::ConfigurationProgressing, "");
    conditions.set(Type::Aborted, False, Reason::ConfigurationProgressing, "");
}

/// The engine applied and verified the desired state.
pub fn set_success(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, True, Reason::AllSelectorsMatching, "");
    conditions.set(Type::Pending, False, Reason::SuccessfullyConfigured, "");
    conditions.set(Type::Progressing, False, Reason::SuccessfullyConfigured, "");
    conditions.set(Type::Available, True, Reason::SuccessfullyConfigured, message);
    conditions.set(Type::Failing, False, Reason::SuccessfullyConfigured, "");
    conditions.set(Type::Aborted, False, Reason::SuccessfullyConfigured, "");
}

/// The engine rejected the desired state and rolled the host back.
pub fn set_failed_to_configure(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, True, Reason::AllSelectorsMatching, "");
    conditions.set(Type::Pending, False, Reason::FailedToConfigure, "");
    conditions.set(Type::Progressing, False, Reason::FailedToConfigure, "");
    conditions.set(Type::Available, False, Reason::FailedToConfigure, "");
    conditions.set(Type::Failing, True, Reason::FailedToConfigure, message);
    conditions.set(Type::Aborted, False, Reason::FailedToConfigure, "");
}

/// A sibling enactment failed for this generation; the host was not touched.
pub fn set_aborted(conditions: &mut ConditionList, message: impl Into<String>) {
    let message = message.into();
    conditions.set(Type::Matching, True, Reason::AllSelectorsMatching, "");
    conditions.set(Type::Pending, False, Reason::ConfigurationAborted, "");
    conditions.set(Type::Progressing, False, Reason::ConfigurationAborted, "");
    conditions.set(Type::Available, False, Reason::ConfigurationAborted, "");
    conditions.set(Type::Failing, False, Reason::ConfigurationAborted, "");
    conditions.set(Type::Aborted, True, Reason::ConfigurationAborted, message);
}

/// True when the vector says an apply is currently in flight
pub fn is_progressing(conditions: &ConditionList) -> bool {
    conditions.status_of(Type::Progressing) == Some(True)
}
