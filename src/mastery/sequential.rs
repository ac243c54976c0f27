//! Sequential tests over a learner's outcome stream.
//!
//! - CUSUM: two one-sided cumulative sums over the 0/1 correctness sequence,
//!   raising an alarm on a sustained shift away from the target rate.
//! - SPRT: Wald's likelihood-ratio test between a "not mastered" and a
//!   "mastered" Bernoulli rate, driven by the unweighted outcome counts kept
//!   beside each Beta belief.

use serde::{Deserialize, Serialize};

use crate::mastery::types::{Evidence, MasteryStatus};

pub const DEFAULT_CUSUM_TARGET: f64 = 0.5;
pub const DEFAULT_CUSUM_SLACK: f64 = 0.1;
pub const DEFAULT_CUSUM_THRESHOLD: f64 = 2.0;

pub const DEFAULT_SPRT_LOWER: f64 = 0.05;
pub const DEFAULT_SPRT_UPPER: f64 = 20.0;
pub const DEFAULT_P_NOT_MASTERED: f64 = 0.5;
pub const DEFAULT_P_MASTERED: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusumParams {
    pub target: f64,
    pub slack: f64,
    pub threshold: f64,
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            target: DEFAULT_CUSUM_TARGET,
            slack: DEFAULT_CUSUM_SLACK,
            threshold: DEFAULT_CUSUM_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CusumState {
    /// Upward statistic `S`: grows on runs of correct answers.
    pub upper: f64,
    /// Downward statistic: grows on runs of incorrect answers.
    pub lower: f64,
    pub observations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    Improving,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusumAlarm {
    pub direction: DriftDirection,
    pub score: f64,
    pub observations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusumUpdate {
    pub state: CusumState,
    pub alarm: Option<CusumAlarm>,
}

impl CusumState {
    /// Feed one outcome (`x = 1` correct, `x = 0` otherwise).
    ///
    /// The side that reaches the threshold is reported and then restarts from 0.
    pub fn observe(&mut self, correct: bool, params: &CusumParams) -> Option<CusumAlarm> {
        let x = if correct { 1.0 } else { 0.0 };
        self.upper = (self.upper + (x - params.target) - params.slack).max(0.0);
        self.lower = (self.lower + (params.target - x) - params.slack).max(0.0);
        self.observations = self.observations.saturating_add(1);

        if self.upper >= params.threshold {
            let alarm = CusumAlarm {
                direction: DriftDirection::Improving,
                score: self.upper,
                observations: self.observations,
            };
            self.upper = 0.0;
            Some(alarm)
        } else if self.lower >= params.threshold {
            let alarm = CusumAlarm {
                direction: DriftDirection::Declining,
                score: self.lower,
                observations: self.observations,
            };
            self.lower = 0.0;
            Some(alarm)
        } else {
            None
        }
    }
}

/// SPRT decision bounds on the likelihood ratio `Λ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtBounds {
    /// At or below: not mastered.
    pub lower: f64,
    /// At or above: mastered.
    pub upper: f64,
}

impl Default for SprtBounds {
    fn default() -> Self {
        Self {
            lower: DEFAULT_SPRT_LOWER,
            upper: DEFAULT_SPRT_UPPER,
        }
    }
}

impl SprtBounds {
    pub fn is_valid(&self) -> bool {
        self.lower.is_finite()
            && self.upper.is_finite()
            && self.lower > 0.0
            && self.lower < 1.0
            && self.upper > 1.0
    }
}

/// Bernoulli success rates under the two hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtHypotheses {
    pub p_not_mastered: f64,
    pub p_mastered: f64,
}

impl Default for SprtHypotheses {
    fn default() -> Self {
        Self {
            p_not_mastered: DEFAULT_P_NOT_MASTERED,
            p_mastered: DEFAULT_P_MASTERED,
        }
    }
}

impl SprtHypotheses {
    pub fn is_valid(&self) -> bool {
        0.0 < self.p_not_mastered && self.p_not_mastered < self.p_mastered && self.p_mastered < 1.0
    }
}

/// `ln Λ` for `evidence`, one Bernoulli trial per recorded outcome.
pub fn log_likelihood_ratio(evidence: &Evidence, hypotheses: &SprtHypotheses) -> f64 {
    let p0 = hypotheses.p_not_mastered;
    let p1 = hypotheses.p_mastered;
    f64::from(evidence.successes) * (p1 / p0).ln()
        + f64::from(evidence.failures) * ((1.0 - p1) / (1.0 - p0)).ln()
}

/// Deterministic SPRT classification of stored outcome counts.
pub fn classify_mastery(evidence: &Evidence, bounds: &SprtBounds, hypotheses: &SprtHypotheses) -> MasteryStatus {
    let llr = log_likelihood_ratio(evidence, hypotheses);
    if llr >= bounds.upper.ln() {
        MasteryStatus::Mastered
    } else if llr <= bounds.lower.ln() {
        MasteryStatus::NotMastered
    } else {
        MasteryStatus::Testing
    }
}
