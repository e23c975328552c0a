//! Probability-to-decision mapping

use serde::{Deserialize, Serialize};

/// Credit decision; `Refuse` is the adverse outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Refuse,
}

impl Decision {
    /// 0 for approve, 1 for refuse
    pub fn flag(self) -> u8 {
        match self {
            Decision::Approve => 0,
            Decision::Refuse => 1,
        }
    }
}

impl From<Decision> for u8 {
    fn from(decision: Decision) -> Self {
        decision.flag()
    }
}

/// Refuse iff `probability >= threshold` (the boundary itself refuses).
pub fn decide(probability: f64, threshold: f64) -> Decision {
    if probability >= threshold {
        Decision::Refuse
    } else {
        Decision::Approve
    }
}
