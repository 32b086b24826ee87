//! Points policy and per-movement outcome tallies
//!
//! Points are computed in checked integer arithmetic only. They feed exact
//! threshold comparisons against the badge ladder.

use serde::{Deserialize, Serialize};

use crate::error::{GamificationError, Result};

/// Outcome classification of a single repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Perfect,
    Imperfect,
    Undetected,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 3] = [
        OutcomeKind::Perfect,
        OutcomeKind::Imperfect,
        OutcomeKind::Undetected,
    ];
}

/// Points awarded per repetition of each outcome kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsPolicy {
    #[serde(default = "default_perfect")]
    pub perfect: i64,
    #[serde(default = "default_imperfect")]
    pub imperfect: i64,
    #[serde(default = "default_undetected")]
    pub undetected: i64,
}

fn default_perfect() -> i64 {
    10
}

fn default_imperfect() -> i64 {
    5
}

fn default_undetected() -> i64 {
    1
}

impl Default for PointsPolicy {
    fn default() -> Self {
        Self {
            perfect: default_perfect(),
            imperfect: default_imperfect(),
            undetected: default_undetected(),
        }
    }
}

impl PointsPolicy {
    /// Points per unit for an outcome kind
    pub fn points_for(&self, kind: OutcomeKind) -> i64 {
        match kind {
            OutcomeKind::Perfect => self.perfect,
            OutcomeKind::Imperfect => self.imperfect,
            OutcomeKind::Undetected => self.undetected,
        }
    }

    /// Reject negative weights; a negative weight could shrink a ledger total.
    pub fn validate(&self) -> Result<()> {
        for kind in OutcomeKind::ALL {
            if self.points_for(kind) < 0 {
                return Err(GamificationError::Config(format!(
                    "points for {:?} must be >= 0, got {}",
                    kind,
                    self.points_for(kind)
                )));
            }
        }
        Ok(())
    }

    /// Sum points over all movement outcomes
    pub fn points_earned(&self, outcomes: &[MovementOutcome]) -> Result<i64> {
        outcomes.iter().try_fold(0i64, |total, outcome| {
            let points = outcome.points(self)?;
            total.checked_add(points).ok_or_else(overflow)
        })
    }
}

fn overflow() -> GamificationError {
    GamificationError::Validation("points total overflows".into())
}

/// Per-movement tally of repetition outcomes within one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementOutcome {
    /// Catalog id of the exercise performed
    pub movement_id: i64,
    /// Planned program detail this result corresponds to
    #[serde(default)]
    pub planned_detail_id: Option<i64>,
    /// Position of the movement within the program (1-based)
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub perfect: i64,
    #[serde(default)]
    pub imperfect: i64,
    #[serde(default)]
    pub undetected: i64,
    #[serde(default)]
    pub actual_duration_secs: Option<i64>,
}

impl MovementOutcome {
    pub fn count(&self, kind: OutcomeKind) -> i64 {
        match kind {
            OutcomeKind::Perfect => self.perfect,
            OutcomeKind::Imperfect => self.imperfect,
            OutcomeKind::Undetected => self.undetected,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.movement_id <= 0 {
            return Err(GamificationError::Validation(
                "movement_id is required".into(),
            ));
        }
        for kind in OutcomeKind::ALL {
            if self.count(kind) < 0 {
                return Err(GamificationError::Validation(format!(
                    "{:?} count must be >= 0, got {}",
                    kind,
                    self.count(kind)
                )));
            }
        }
        if let Some(secs) = self.actual_duration_secs {
            if secs < 0 {
                return Err(GamificationError::Validation(
                    "actual_duration_secs must be >= 0".into(),
                ));
            }
        }
        Ok(())
    }

    /// Points for this movement under the given policy
    pub fn points(&self, policy: &PointsPolicy) -> Result<i64> {
        OutcomeKind::ALL.iter().try_fold(0i64, |total, &kind| {
            let part = self
                .count(kind)
                .checked_mul(policy.points_for(kind))
                .ok_or_else(overflow)?;
            total.checked_add(part).ok_or_else(overflow)
        })
    }
}
