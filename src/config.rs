use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostic::graph::{ADVANCED_DEPENDENT_THRESHOLD, FOUNDATIONAL_PREREQUISITE_LIMIT};
use crate::mastery::sequential::{CusumParams, SprtBounds, SprtHypotheses};
use crate::mastery::types::{Belief, DEFAULT_PRIOR};
use crate::mastery::weighting::DEFAULT_EXPONENTIAL_BASE;

pub const DEFAULT_QUESTION_COUNT: usize = 20;
pub const DEFAULT_FOUNDATIONAL_RATIO: f64 = 0.7;
pub const DEFAULT_BASE_DELTA: f64 = 10.0;
pub const DEFAULT_PROPAGATION_FACTOR: f64 = 0.3;
pub const CORRECT_STREAK_TO_RAISE: u32 = 3;
pub const INCORRECT_STREAK_TO_LOWER: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryConfig {
    pub prior: Belief,
    pub exponential_base: f64,
    pub sprt_bounds: SprtBounds,
    pub sprt_hypotheses: SprtHypotheses,
    pub cusum: CusumParams,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            prior: DEFAULT_PRIOR,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            sprt_bounds: SprtBounds::default(),
            sprt_hypotheses: SprtHypotheses::default(),
            cusum: CusumParams::default(),
        }
    }
}

impl MasteryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.prior.alpha > 0.0 && self.prior.beta > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "prior must be positive, got ({}, {})",
                self.prior.alpha, self.prior.beta
            )));
        }
        // base^2 >= 3 keeps exponential weights at or above linear from d = 3.
        if !(self.exponential_base.is_finite() && self.exponential_base >= 3f64.sqrt()) {
            return Err(ConfigError::InvalidParameter(format!(
                "exponential base must be >= sqrt(3), got {}",
                self.exponential_base
            )));
        }
        if !self.sprt_bounds.is_valid() {
            return Err(ConfigError::InvalidParameter(format!(
                "SPRT bounds must satisfy 0 < A < 1 < B, got A={} B={}",
                self.sprt_bounds.lower, self.sprt_bounds.upper
            )));
        }
        if !self.sprt_hypotheses.is_valid() {
            return Err(ConfigError::InvalidParameter(
                "SPRT hypotheses must satisfy 0 < p0 < p1 < 1".to_string(),
            ));
        }
        let cusum = &self.cusum;
        if !(0.0..=1.0).contains(&cusum.target) || cusum.slack < 0.0 || !(cusum.threshold > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "invalid CUSUM parameters: target={} slack={} threshold={}",
                cusum.target, cusum.slack, cusum.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    pub question_count: usize,
    pub foundational_ratio: f64,
    pub base_delta: f64,
    pub propagation_factor: f64,
    pub foundational_prerequisite_limit: usize,
    pub advanced_dependent_threshold: usize,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            question_count: DEFAULT_QUESTION_COUNT,
            foundational_ratio: DEFAULT_FOUNDATIONAL_RATIO,
            base_delta: DEFAULT_BASE_DELTA,
            propagation_factor: DEFAULT_PROPAGATION_FACTOR,
            foundational_prerequisite_limit: FOUNDATIONAL_PREREQUISITE_LIMIT,
            advanced_dependent_threshold: ADVANCED_DEPENDENT_THRESHOLD,
        }
    }
}

impl DiagnosticConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.foundational_ratio) {
            return Err(ConfigError::InvalidParameter(format!(
                "foundational ratio must be within [0, 1], got {}",
                self.foundational_ratio
            )));
        }
        if !(self.base_delta.is_finite() && self.base_delta > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "base delta must be positive, got {}",
                self.base_delta
            )));
        }
        if !(0.0..=1.0).contains(&self.propagation_factor) {
            return Err(ConfigError::InvalidParameter(format!(
                "propagation factor must be within [0, 1], got {}",
                self.propagation_factor
            )));
        }
        Ok(())
    }

    /// Foundational share of a test of `total` questions.
    pub fn foundational_count(&self, total: usize) -> usize {
        ((total as f64) * self.foundational_ratio).round() as usize
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub file_logs: bool,
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub log: LogConfig,
    /// SQLite URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub mastery: MasteryConfig,
    pub diagnostic: DiagnosticConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; absent keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(level) = lookup("RUST_LOG") {
            config.log.level = level;
        }
        if let Some(flag) = lookup("ENABLE_FILE_LOGS") {
            config.log.file_logs = flag == "true" || flag == "1";
        }
        if let Some(dir) = lookup("LOG_DIR") {
            config.log.log_dir = dir;
        }
        config.database_url = lookup("MASTERY_DATABASE_URL").filter(|url| !url.trim().is_empty());

        let mastery = &mut config.mastery;
        parse_into(&lookup, "MASTERY_PRIOR_ALPHA", &mut mastery.prior.alpha)?;
        parse_into(&lookup, "MASTERY_PRIOR_BETA", &mut mastery.prior.beta)?;
        parse_into(&lookup, "MASTERY_EXPONENTIAL_BASE", &mut mastery.exponential_base)?;
        parse_into(&lookup, "MASTERY_SPRT_LOWER", &mut mastery.sprt_bounds.lower)?;
        parse_into(&lookup, "MASTERY_SPRT_UPPER", &mut mastery.sprt_bounds.upper)?;
        parse_into(&lookup, "MASTERY_CUSUM_TARGET", &mut mastery.cusum.target)?;
        parse_into(&lookup, "MASTERY_CUSUM_SLACK", &mut mastery.cusum.slack)?;
        parse_into(&lookup, "MASTERY_CUSUM_THRESHOLD", &mut mastery.cusum.threshold)?;

        let diagnostic = &mut config.diagnostic;
        parse_into(&lookup, "DIAGNOSTIC_QUESTION_COUNT", &mut diagnostic.question_count)?;
        parse_into(&lookup, "DIAGNOSTIC_BASE_DELTA", &mut diagnostic.base_delta)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mastery.validate()?;
        self.diagnostic.validate()
    }
}

fn parse_into<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw })?;
    }
    Ok(())
}
