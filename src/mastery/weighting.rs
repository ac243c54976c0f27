use crate::mastery::types::{Difficulty, ScalingType};

pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

/// Velocity factor at p = 0.
pub const VELOCITY_MAX: f64 = 2.0;
/// Velocity factor at p = 1.
pub const VELOCITY_MIN: f64 = 0.5;

/// Flat alpha increment for re-answering an already-solved question.
pub const REPEAT_CORRECT_INCREMENT: f64 = 0.5;

/// Skips at or above this level carry the full difficulty weight.
pub const HARD_SKIP_THRESHOLD: u8 = 3;
pub const EASY_SKIP_FACTOR: f64 = 0.5;

/// How much a single attempt at difficulty `d` moves the belief.
///
/// `Linear` is `d`; `Exponential` is `base^(d-1)`, which matches linear at
/// d = 1 and (for base 2) d = 2, then outgrows it.
pub fn difficulty_weight(scaling: ScalingType, difficulty: Difficulty, exponential_base: f64) -> f64 {
    let d = difficulty.as_f64();
    match scaling {
        ScalingType::Linear => d,
        ScalingType::Exponential => exponential_base.powf(d - 1.0),
    }
}

/// Multiplier on alpha gains: large while mastery is low, damped near mastery.
pub fn velocity_factor(p: f64) -> f64 {
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    VELOCITY_MAX - (VELOCITY_MAX - VELOCITY_MIN) * p
}

/// Beta increment for a skipped item.
pub fn skip_penalty(weight: f64, difficulty: Difficulty) -> f64 {
    if difficulty.level() >= HARD_SKIP_THRESHOLD {
        weight
    } else {
        EASY_SKIP_FACTOR * weight
    }
}
