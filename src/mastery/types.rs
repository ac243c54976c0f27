use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::mastery::MasteryError;

pub type SkillId = u32;

/// Strong low-mastery prior applied to any (user, skill, course) without a stored belief.
pub const DEFAULT_PRIOR: Belief = Belief {
    alpha: 1.0,
    beta: 40.0,
};

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

/// Beta(alpha, beta) belief over a learner's mastery of one skill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub alpha: f64,
    pub beta: f64,
}

impl Belief {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha: alpha.max(0.0),
            beta: beta.max(0.0),
        }
    }

    /// Mean of the Beta distribution.
    pub fn mastery_probability(&self) -> f64 {
        let sum = self.alpha + self.beta;
        if sum > 0.0 {
            self.alpha / sum
        } else {
            0.5
        }
    }
}

impl Default for Belief {
    fn default() -> Self {
        DEFAULT_PRIOR
    }
}

/// Unweighted outcome counts stored beside a belief.
///
/// `alpha`/`beta` are scaled by difficulty and velocity; the SPRT reads these
/// instead so one hard question counts as one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub successes: u32,
    pub failures: u32,
}

impl Evidence {
    pub fn new(successes: u32, failures: u32) -> Self {
        Self { successes, failures }
    }

    pub fn trials(&self) -> u32 {
        self.successes.saturating_add(self.failures)
    }
}

/// Row key for per-learner state: `(user, skill, course)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeliefKey {
    pub user_id: String,
    pub skill_id: SkillId,
    pub course_id: String,
}

impl BeliefKey {
    pub fn new(user_id: impl Into<String>, skill_id: SkillId, course_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            skill_id,
            course_id: course_id.into(),
        }
    }
}

impl fmt::Display for BeliefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.skill_id, self.course_id)
    }
}

/// Question difficulty on the 1..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const EASIEST: Difficulty = Difficulty(MIN_DIFFICULTY);
    pub const HARDEST: Difficulty = Difficulty(MAX_DIFFICULTY);

    pub fn new(level: i64) -> Result<Self, MasteryError> {
        if (MIN_DIFFICULTY as i64..=MAX_DIFFICULTY as i64).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(MasteryError::Validation(format!(
                "difficulty must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}, got {level}"
            )))
        }
    }

    pub const fn from_level(level: u8) -> Option<Self> {
        if level >= MIN_DIFFICULTY && level <= MAX_DIFFICULTY {
            Some(Self(level))
        } else {
            None
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0)
    }

    pub fn harder(self) -> Self {
        Self((self.0 + 1).min(MAX_DIFFICULTY))
    }

    pub fn easier(self) -> Self {
        Self(self.0.saturating_sub(1).max(MIN_DIFFICULTY))
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = MasteryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Difficulty> for i64 {
    fn from(value: Difficulty) -> Self {
        i64::from(value.0)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingType {
    Linear,
    Exponential,
}

impl ScalingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingType::Linear => "linear",
            ScalingType::Exponential => "exponential",
        }
    }
}

impl FromStr for ScalingType {
    type Err = MasteryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ScalingType::Linear),
            "exponential" => Ok(ScalingType::Exponential),
            other => Err(MasteryError::Validation(format!(
                "unknown scaling type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryStatus {
    Testing,
    Mastered,
    NotMastered,
}

impl MasteryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryStatus::Testing => "testing",
            MasteryStatus::Mastered => "mastered",
            MasteryStatus::NotMastered => "not_mastered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "testing" => Some(MasteryStatus::Testing),
            "mastered" => Some(MasteryStatus::Mastered),
            "not_mastered" => Some(MasteryStatus::NotMastered),
            _ => None,
        }
    }
}

/// Attempt as submitted by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub user_id: String,
    pub question_id: String,
    pub skill_ids: Vec<SkillId>,
    pub finished: bool,
    pub is_correct: bool,
    pub difficulty: i64,
    pub scaling_type: String,
    pub course_id: String,
    #[serde(default)]
    pub response_time_ms: Option<i64>,
}

/// Attempt after validation, as written to the attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub user_id: String,
    pub question_id: String,
    pub course_id: String,
    pub skill_ids: Vec<SkillId>,
    pub finished: bool,
    pub is_correct: bool,
    pub difficulty: Difficulty,
    pub response_time_ms: Option<i64>,
    pub timestamp: i64,
}

/// Per-skill result of processing one attempt event.
#[derive(Debug, Clone, Serialize)]
pub struct SkillOutcome {
    pub skill_id: SkillId,
    pub belief: Belief,
    pub mastery_probability: f64,
    pub cusum: crate::mastery::sequential::CusumUpdate,
    pub status: MasteryStatus,
    pub repeat_correct: bool,
}

/// Read-only view of one skill for a learner.
#[derive(Debug, Clone, Serialize)]
pub struct SkillMastery {
    pub skill_id: SkillId,
    pub belief: Belief,
    pub mastery_probability: f64,
    pub status: MasteryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prior_probability() {
        let p = DEFAULT_PRIOR.mastery_probability();
        assert!((p - 1.0 / 41.0).abs() < 1e-12);
        assert!((p - 0.0244).abs() < 1e-4);
    }

    #[test]
    fn test_difficulty_bounds() {
        assert!(Difficulty::new(0).is_err());
        assert!(Difficulty::new(6).is_err());
        assert_eq!(Difficulty::new(3).unwrap().level(), 3);
        assert_eq!(Difficulty::HARDEST.harder(), Difficulty::HARDEST);
        assert_eq!(Difficulty::EASIEST.easier(), Difficulty::EASIEST);
    }

    #[test]
    fn test_scaling_type_parse() {
        assert_eq!("linear".parse::<ScalingType>().unwrap(), ScalingType::Linear);
        assert_eq!(
            "exponential".parse::<ScalingType>().unwrap(),
            ScalingType::Exponential
        );
        let err = "quadratic".parse::<ScalingType>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            MasteryStatus::Testing,
            MasteryStatus::Mastered,
            MasteryStatus::NotMastered,
        ] {
            assert_eq!(MasteryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MasteryStatus::parse("unknown"), None);
    }
}
