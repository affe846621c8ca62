//! Step status and the status combination rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of one execution cycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The process produced fresh output this cycle.
    Success,
    /// The process will never produce output again.
    Failure,
    /// No output this cycle; a later cycle may succeed.
    Skip,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Success
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

impl From<bool> for StepStatus {
    /// Maps a legacy boolean step result: `true` is success, `false` is failure.
    fn from(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

impl StepStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true if fresh output is available.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Combines the statuses observed on a node's required incoming edges.
///
/// Any failure wins, then any skip; otherwise the node may step. An empty
/// input (a source) always steps.
pub fn combine_statuses<I>(statuses: I) -> StepStatus
where
    I: IntoIterator<Item = StepStatus>,
{
    let mut combined = StepStatus::Success;
    for status in statuses {
        match status {
            StepStatus::Failure => return StepStatus::Failure,
            StepStatus::Skip => combined = StepStatus::Skip,
            StepStatus::Success => {}
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_display() {
        assert_eq!(StepStatus::Success.to_string(), "success");
        assert_eq!(StepStatus::Failure.to_string(), "failure");
        assert_eq!(StepStatus::Skip.to_string(), "skip");
    }

    #[test]
    fn test_step_status_serde() {
        let json = serde_json::to_string(&StepStatus::Skip).unwrap();
        assert_eq!(json, "\"skip\"");
        let back: StepStatus = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(back, StepStatus::Failure);
    }

    #[test]
    fn test_from_legacy_bool() {
        assert_eq!(StepStatus::from(true), StepStatus::Success);
        assert_eq!(StepStatus::from(false), StepStatus::Failure);
    }

    #[test]
    fn test_combination_table() {
        use StepStatus::{Failure, Skip, Success};
        let all = [Success, Failure, Skip];
        for a in all {
            for b in all {
                let expected = if a == Failure || b == Failure {
                    Failure
                } else if a == Skip || b == Skip {
                    Skip
                } else {
                    Success
                };
                assert_eq!(combine_statuses([a, b]), expected, "{a} + {b}");
            }
        }
    }

    #[test]
    fn test_combination_of_nothing_steps() {
        assert_eq!(combine_statuses(std::iter::empty()), StepStatus::Success);
    }

    #[test]
    fn test_failure_wins_over_later_skip() {
        assert_eq!(
            combine_statuses([StepStatus::Skip, StepStatus::Failure, StepStatus::Skip]),
            StepStatus::Failure
        );
    }
}
