//! Mastery estimation - Bayesian skill tracking per learner
//!
//! Contains:
//! - Beta(alpha, beta) beliefs with a strong low-mastery prior
//! - Difficulty weighting (linear / exponential) and velocity damping
//! - CUSUM drift detection and SPRT mastery classification
//! - MasteryEstimator - store-backed entry point for attempt processing

pub mod estimator;
pub mod locks;
pub mod sequential;
pub mod types;
pub mod weighting;

pub use estimator::{
    apply_attempt, record_outcome, validate_event, AttemptInput, AttemptKind, MasteryError, MasteryEstimator,
};
pub use sequential::{
    classify_mastery, log_likelihood_ratio, CusumAlarm, CusumParams, CusumState, CusumUpdate,
    DriftDirection, SprtBounds, SprtHypotheses,
};
pub use types::{
    AttemptEvent, AttemptRecord, Belief, BeliefKey, Difficulty, Evidence, MasteryStatus, ScalingType,
    SkillId, SkillMastery, SkillOutcome, DEFAULT_PRIOR,
};
pub use weighting::{difficulty_weight, velocity_factor};
