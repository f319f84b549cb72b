//! Shared types for the nmstate.io resources

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An opaque network-state document.
///
/// The handler never interprets the full grammar; it carries the document
/// between the policy, the enactment and the network-state engine. The few
/// places that look inside (default VLAN filtering, veth filtering) treat it
/// as a generic mapping.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct State(pub serde_json::Value);

impl State {
    /// Parse a state document from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::Error> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| crate::Error::serialization(format!("invalid state document: {e}")))?;
        Ok(Self(value))
    }

    /// Render the state document as YAML
    pub fn to_yaml(&self) -> Result<String, crate::Error> {
        serde_yaml::to_string(&self.0)
            .map_err(|e| crate::Error::serialization(format!("state document: {e}")))
    }

    /// True when no document has been set
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition types used across enactments and policies.
///
/// Enactments use {Matching, Pending, Progressing, Available, Failing,
/// Aborted}; policies use {Available, Degraded, Progressing}.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionType {
    /// The policy node selector matches this node
    Matching,
    /// Waiting for maxUnavailable capacity to free up
    Pending,
    /// The desired state is being applied
    Progressing,
    /// The desired state is applied and verified
    Available,
    /// Applying the desired state failed and was rolled back
    Failing,
    /// A sibling enactment failed, so this node did not touch the host
    Aborted,
    /// Policy-level: at least one enactment failed or aborted
    Degraded,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Matching => "Matching",
            Self::Pending => "Pending",
            Self::Progressing => "Progressing",
            Self::Available => "Available",
            Self::Failing => "Failing",
            Self::Aborted => "Aborted",
            Self::Degraded => "Degraded",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable reasons attached to conditions
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionReason {
    /// The desired state was applied and verified
    SuccessfullyConfigured,
    /// The engine rejected the desired state and rolled back
    FailedToConfigure,
    /// The desired state is being handed to the engine
    ConfigurationProgressing,
    /// A sibling enactment failed for this generation
    ConfigurationAborted,
    /// The cluster-wide unavailable budget is saturated
    MaxUnavailableLimitReached,
    /// Every selector entry matches the node labels
    AllSelectorsMatching,
    /// At least one selector entry does not match the node labels
    NodeSelectorNotMatching,
    /// The node object could not be read to evaluate selectors
    NodeSelectorFailure,
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SuccessfullyConfigured => "SuccessfullyConfigured",
            Self::FailedToConfigure => "FailedToConfigure",
            Self::ConfigurationProgressing => "ConfigurationProgressing",
            Self::ConfigurationAborted => "ConfigurationAborted",
            Self::MaxUnavailableLimitReached => "MaxUnavailableLimitReached",
            Self::AllSelectorsMatching => "AllSelectorsMatching",
            Self::NodeSelectorNotMatching => "NodeSelectorNotMatching",
            Self::NodeSelectorFailure => "NodeSelectorFailure",
        };
        write!(f, "{s}")
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: ConditionReason,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned between statuses
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,

    /// Last time the condition was written, transition or not
    #[serde(rename = "lastHeartbeatTime")]
    pub last_heartbeat_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with transition timestamps set to now
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_,
            status,
            reason,
            message: message.into(),
            last_transition_time: now,
            last_heartbeat_time: now,
        }
    }
}

/// An ordered set of conditions, at most one per type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ConditionList(pub Vec<Condition>);

impl ConditionList {
    /// Create an empty condition list
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a condition, replacing any existing condition of the same type.
    ///
    /// `lastTransitionTime` is only bumped when the status actually changes,
    /// per Kubernetes conventions.
    pub fn set(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
    ) {
        let mut condition = Condition::new(type_, status, reason, message);
        if let Some(existing) = self.find(type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.0.retain(|c| c.type_ != type_);
        self.0.push(condition);
    }

    /// Find the condition of the given type
    pub fn find(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// The status of the given type, if present
    pub fn status_of(&self, type_: ConditionType) -> Option<ConditionStatus> {
        self.find(type_).map(|c| c.status)
    }

    /// True when no conditions have been written yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clear all conditions
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// `maxUnavailable` accepts either an absolute node count or a percentage of
/// the policy's matching nodes.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum IntOrPercent {
    /// Absolute cap on simultaneously progressing nodes
    Int(i64),
    /// Percentage of matching nodes, e.g. "50%"
    Percent(String),
}

impl Default for IntOrPercent {
    fn default() -> Self {
        Self::Percent("50%".to_string())
    }
}

/// A label mapping as used by node selectors
pub type LabelMap = BTreeMap<String, String>;
