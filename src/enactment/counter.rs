//! Enactment condition counter
//!
//! Folds a list of enactments into a 5x3 matrix of condition counts for one
//! policy generation. Reports carrying an older generation are stale: their
//! verdict axes (Available, Failing, Progressing) count as Unknown, while
//! Pending and Aborted count as False so a stopped rollout from a previous
//! generation never satisfies or degrades the current one.

use crate::crd::types::{ConditionStatus, ConditionType};
use crate::crd::NodeNetworkConfigurationEnactment;

/// Per-status tally for one condition type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCount {
    true_count: usize,
    false_count: usize,
    unknown_count: usize,
}

impl StatusCount {
    /// Build a tally directly; used by tests pinning the matrix
    pub fn of(true_count: usize, false_count: usize, unknown_count: usize) -> Self {
        Self {
            true_count,
            false_count,
            unknown_count,
        }
    }

    fn bump(&mut self, status: ConditionStatus) {
        match status {
            ConditionStatus::True => self.true_count += 1,
            ConditionStatus::False => self.false_count += 1,
            ConditionStatus::Unknown => self.unknown_count += 1,
        }
    }

    /// Enactments reporting True for this type
    pub fn true_count(&self) -> usize {
        self.true_count
    }

    /// Enactments reporting False for this type
    pub fn false_count(&self) -> usize {
        self.false_count
    }

    /// Enactments with no verdict for this type
    pub fn unknown_count(&self) -> usize {
        self.unknown_count
    }
}

/// The 5x3 matrix of condition counts over a policy's enactments
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConditionCount {
    /// Tally of the Available axis
    pub available: StatusCount,
    /// Tally of the Failing axis
    pub failing: StatusCount,
    /// Tally of the Progressing axis
    pub progressing: StatusCount,
    /// Tally of the Pending axis
    pub pending: StatusCount,
    /// Tally of the Aborted axis
    pub aborted: StatusCount,
}

impl ConditionCount {
    /// Number of enactments that contributed to the count
    pub fn total(&self) -> usize {
        self.available.true_count + self.available.false_count + self.available.unknown_count
    }
}

/// The condition types the matrix tallies (Matching is a gate, not a tally)
const COUNTED_TYPES: [ConditionType; 5] = [
    ConditionType::Available,
    ConditionType::Failing,
    ConditionType::Progressing,
    ConditionType::Pending,
    ConditionType::Aborted,
];

/// Count enactment conditions against the current policy generation.
///
/// Enactments whose Matching condition is explicitly False are excluded:
/// their node left the selector and they no longer participate in the
/// rollout.
pub fn count(
    enactments: &[NodeNetworkConfigurationEnactment],
    policy_generation: i64,
) -> ConditionCount {
    let mut counts = ConditionCount::default();

    for enactment in enactments {
        let conditions = enactment.conditions();
        if conditions.status_of(ConditionType::Matching) == Some(ConditionStatus::False) {
            continue;
        }

        let stale = enactment.policy_generation() != policy_generation;
        for type_ in COUNTED_TYPES {
            let status = if stale {
                match type_ {
                    ConditionType::Pending | ConditionType::Aborted => ConditionStatus::False,
                    _ => ConditionStatus::Unknown,
                }
            } else {
                conditions.status_of(type_).unwrap_or(ConditionStatus::Unknown)
            };

            match type_ {
                ConditionType::Available => counts.available.bump(status),
                ConditionType::Failing => counts.failing.bump(status),
                ConditionType::Progressing => counts.progressing.bump(status),
                ConditionType::Pending => counts.pending.bump(status),
                ConditionType::Aborted => counts.aborted.bump(status),
                _ => unreachable!(),
            }
        }
    }

    counts
}
