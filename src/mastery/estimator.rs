use std::sync::Arc;

use thiserror::Error;

use crate::config::MasteryConfig;
use crate::mastery::locks::KeyedLocks;
use crate::mastery::sequential::{
    classify_mastery, log_likelihood_ratio, CusumAlarm, CusumUpdate, SprtBounds,
};
use crate::mastery::types::{
    AttemptEvent, AttemptRecord, Belief, BeliefKey, Difficulty, Evidence, MasteryStatus,
    ScalingType, SkillId, SkillMastery, SkillOutcome,
};
use crate::mastery::weighting::{
    difficulty_weight, skip_penalty, velocity_factor, REPEAT_CORRECT_INCREMENT,
};
use crate::store::{MasteryStore, SkillWrite, StatusEntry, StoreError};

#[derive(Debug, Error)]
pub enum MasteryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl MasteryError {
    pub fn is_validation(&self) -> bool {
        matches!(self, MasteryError::Validation(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, MasteryError::Storage(_))
    }
}

/// How one attempt moves a belief, before the repeat rule is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Correct,
    Incorrect,
    Skipped,
}

impl AttemptKind {
    pub fn from_flags(finished: bool, correct: bool) -> Self {
        match (finished, correct) {
            (true, true) => AttemptKind::Correct,
            (true, false) => AttemptKind::Incorrect,
            (false, _) => AttemptKind::Skipped,
        }
    }
}

/// Validated form of one `UpdateFromAttempt` call.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInput {
    pub kind: AttemptKind,
    pub difficulty: Difficulty,
    pub scaling: ScalingType,
    /// The learner already solved this exact question before.
    pub repeat_correct: bool,
}

/// Pure belief transition for one attempt.
pub fn apply_attempt(belief: Belief, input: &AttemptInput, exponential_base: f64) -> Belief {
    let weight = difficulty_weight(input.scaling, input.difficulty, exponential_base);
    let mut next = belief;
    match input.kind {
        AttemptKind::Correct if input.repeat_correct => {
            next.alpha += REPEAT_CORRECT_INCREMENT;
        }
        AttemptKind::Correct => {
            next.alpha += velocity_factor(belief.mastery_probability()) * weight;
        }
        AttemptKind::Incorrect => {
            next.beta += weight;
        }
        AttemptKind::Skipped => {
            next.beta += skip_penalty(weight, input.difficulty);
        }
    }
    next
}

/// Outcome counts after one attempt. A repeat-correct answer adds no trial.
pub fn record_outcome(evidence: Evidence, input: &AttemptInput) -> Evidence {
    let mut next = evidence;
    match input.kind {
        AttemptKind::Correct if input.repeat_correct => {}
        AttemptKind::Correct => next.successes = next.successes.saturating_add(1),
        AttemptKind::Incorrect | AttemptKind::Skipped => {
            next.failures = next.failures.saturating_add(1);
        }
    }
    next
}

/// `(user, course, question)`
type QuestionSlot = (String, String, String);

/// Bayesian per-skill mastery tracker over a pluggable store.
///
/// Read-modify-write of a belief is serialised per `(user, skill, course)`;
/// different keys proceed independently. Everything one attempt changes is
/// handed to the store in a single commit.
pub struct MasteryEstimator {
    store: Arc<dyn MasteryStore>,
    config: MasteryConfig,
    locks: KeyedLocks<BeliefKey>,
    /// Taken before any key lock so the repeat-correct lookup and the commit
    /// that logs the attempt cannot interleave.
    question_locks: KeyedLocks<QuestionSlot>,
}

impl MasteryEstimator {
    pub fn new(store: Arc<dyn MasteryStore>, config: MasteryConfig) -> Self {
        Self {
            store,
            config,
            locks: KeyedLocks::new(),
            question_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    /// Stored belief, or the configured prior when none exists.
    pub async fn get_belief(&self, key: &BeliefKey) -> Result<Belief, MasteryError> {
        let stored = self.store.load_belief(key).await?;
        Ok(stored.unwrap_or(self.config.prior))
    }

    pub fn compute_mastery_probability(&self, alpha: f64, beta: f64) -> f64 {
        Belief::new(alpha, beta).mastery_probability()
    }

    pub fn compute_difficulty_weight(&self, scaling_type: &str, difficulty: i64) -> Result<f64, MasteryError> {
        let scaling: ScalingType = scaling_type.parse()?;
        let difficulty = Difficulty::new(difficulty)?;
        Ok(difficulty_weight(scaling, difficulty, self.config.exponential_base))
    }

    pub fn compute_velocity_factor(&self, p: f64) -> f64 {
        velocity_factor(p)
    }

    /// Applies one attempt to the belief of `key` and persists the result.
    ///
    /// Input is validated before anything is read; the store sees one commit.
    pub async fn update_from_attempt(
        &self,
        key: &BeliefKey,
        question_id: Option<&str>,
        finished: bool,
        correct: bool,
        difficulty: i64,
        scaling_type: &str,
    ) -> Result<Belief, MasteryError> {
        validate_key(key)?;
        let difficulty = Difficulty::new(difficulty)?;
        let scaling: ScalingType = scaling_type.parse()?;
        let kind = AttemptKind::from_flags(finished, correct);

        let _question_guard = match question_id {
            Some(qid) => {
                let slot = question_slot(&key.user_id, &key.course_id, qid);
                Some(self.question_locks.lock(&slot).await)
            }
            None => None,
        };
        let _guard = self.locks.lock(key).await;

        let repeat_correct = match (kind, question_id) {
            (AttemptKind::Correct, Some(qid)) => {
                self.store
                    .has_correct_attempt(&key.user_id, &key.course_id, qid)
                    .await?
            }
            _ => false,
        };
        let input = AttemptInput {
            kind,
            difficulty,
            scaling,
            repeat_correct,
        };

        let belief = apply_attempt(self.get_belief(key).await?, &input, self.config.exponential_base);
        let evidence = record_outcome(self.store.load_evidence(key).await?, &input);
        let record = question_id.map(|qid| AttemptRecord {
            user_id: key.user_id.clone(),
            question_id: qid.to_string(),
            course_id: key.course_id.clone(),
            skill_ids: vec![key.skill_id],
            finished,
            is_correct: correct,
            difficulty,
            response_time_ms: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        self.commit(&[SkillWrite::new(key.clone(), belief, evidence)], record.as_ref())
            .await?;

        tracing::debug!(
            key = %key,
            kind = ?input.kind,
            difficulty = input.difficulty.level(),
            repeat = input.repeat_correct,
            alpha = belief.alpha,
            beta = belief.beta,
            "belief updated"
        );
        Ok(belief)
    }

    async fn commit(&self, writes: &[SkillWrite], record: Option<&AttemptRecord>) -> Result<(), MasteryError> {
        self.store.commit_attempt(writes, record).await.map_err(|err| {
            tracing::warn!(skills = writes.len(), error = %err, "attempt commit failed");
            err
        })?;
        Ok(())
    }

    /// Feeds one 0/1 outcome into the CUSUM detector for `key`; returns the new state.
    pub async fn apply_cusum(&self, key: &BeliefKey, correct: bool) -> Result<CusumUpdate, MasteryError> {
        validate_key(key)?;
        let _guard = self.locks.lock(key).await;
        let mut state = self.store.load_cusum(key).await?.unwrap_or_default();
        let alarm = state.observe(correct, &self.config.cusum);
        self.store.save_cusum(key, &state).await?;
        if let Some(alarm) = &alarm {
            report_alarm(key, alarm);
        }
        Ok(CusumUpdate { state, alarm })
    }

    /// SPRT classification of the stored outcome counts against bounds `lower` (A) and `upper` (B).
    ///
    /// The result is cached; it can always be recomputed from the belief row alone.
    pub async fn check_mastery_status(
        &self,
        key: &BeliefKey,
        lower: f64,
        upper: f64,
    ) -> Result<MasteryStatus, MasteryError> {
        validate_key(key)?;
        let bounds = SprtBounds { lower, upper };
        if !bounds.is_valid() {
            return Err(MasteryError::Validation(format!(
                "SPRT bounds must satisfy 0 < A < 1 < B, got A={lower} B={upper}"
            )));
        }

        let _guard = self.locks.lock(key).await;
        self.classify_and_cache(key, &bounds).await
    }

    async fn classify_and_cache(&self, key: &BeliefKey, bounds: &SprtBounds) -> Result<MasteryStatus, MasteryError> {
        let evidence = self.store.load_evidence(key).await?;
        let hypotheses = &self.config.sprt_hypotheses;
        let status = classify_mastery(&evidence, bounds, hypotheses);
        let previous = self.store.load_status(key).await?;
        let entry = StatusEntry {
            status,
            log_likelihood_ratio: log_likelihood_ratio(&evidence, hypotheses),
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.save_status(key, &entry).await?;
        report_status(key, previous.map(|p| p.status), status);
        Ok(status)
    }

    pub async fn cached_status(&self, key: &BeliefKey) -> Result<Option<MasteryStatus>, MasteryError> {
        Ok(self.store.load_status(key).await?.map(|entry| entry.status))
    }

    /// Full handling of one attempt event across all of its skills.
    ///
    /// All new state is computed first and committed together with the
    /// attempt record; a storage error leaves nothing behind.
    pub async fn process_attempt(&self, event: &AttemptEvent) -> Result<Vec<SkillOutcome>, MasteryError> {
        let record = match validate_event(event) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(user_id = %event.user_id, error = %err, "attempt rejected");
                return Err(err);
            }
        };
        let scaling: ScalingType = event.scaling_type.parse()?;
        let kind = AttemptKind::from_flags(record.finished, record.is_correct);
        let correct = kind == AttemptKind::Correct;

        let _question_guard = self
            .question_locks
            .lock(&question_slot(&record.user_id, &record.course_id, &record.question_id))
            .await;
        // `skill_ids` is sorted, so every caller takes key locks in the same order.
        let keys: Vec<BeliefKey> = record
            .skill_ids
            .iter()
            .map(|&skill_id| BeliefKey::new(record.user_id.clone(), skill_id, record.course_id.clone()))
            .collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.locks.lock(key).await);
        }

        let repeat_correct = correct
            && self
                .store
                .has_correct_attempt(&record.user_id, &record.course_id, &record.question_id)
                .await?;
        let input = AttemptInput {
            kind,
            difficulty: record.difficulty,
            scaling,
            repeat_correct,
        };
        let bounds = self.config.sprt_bounds;
        let hypotheses = &self.config.sprt_hypotheses;
        let now = chrono::Utc::now().timestamp_millis();

        let mut writes = Vec::with_capacity(keys.len());
        let mut outcomes = Vec::with_capacity(keys.len());
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let belief = apply_attempt(self.get_belief(&key).await?, &input, self.config.exponential_base);
            let evidence = record_outcome(self.store.load_evidence(&key).await?, &input);
            let mut state = self.store.load_cusum(&key).await?.unwrap_or_default();
            let alarm = state.observe(correct, &self.config.cusum);
            let status = classify_mastery(&evidence, &bounds, hypotheses);
            previous.push(self.store.load_status(&key).await?.map(|entry| entry.status));

            outcomes.push(SkillOutcome {
                skill_id: key.skill_id,
                belief,
                mastery_probability: belief.mastery_probability(),
                cusum: CusumUpdate { state, alarm },
                status,
                repeat_correct,
            });
            writes.push(SkillWrite {
                key,
                belief,
                evidence,
                cusum: Some(state),
                status: Some(StatusEntry {
                    status,
                    log_likelihood_ratio: log_likelihood_ratio(&evidence, hypotheses),
                    updated_at: now,
                }),
            });
        }

        self.commit(&writes, Some(&record)).await?;
        drop(guards);

        for ((write, outcome), before) in writes.iter().zip(&outcomes).zip(previous) {
            if let Some(alarm) = &outcome.cusum.alarm {
                report_alarm(&write.key, alarm);
            }
            report_status(&write.key, before, outcome.status);
        }
        tracing::debug!(
            user_id = %record.user_id,
            question_id = %record.question_id,
            skills = record.skill_ids.len(),
            repeat = repeat_correct,
            "attempt processed"
        );
        Ok(outcomes)
    }

    /// Belief, probability and cached status for each requested skill.
    pub async fn mastery_overview(
        &self,
        user_id: &str,
        course_id: &str,
        skills: &[SkillId],
    ) -> Result<Vec<SkillMastery>, MasteryError> {
        let mut overview = Vec::with_capacity(skills.len());
        for &skill_id in skills {
            let key = BeliefKey::new(user_id, skill_id, course_id);
            let belief = self.get_belief(&key).await?;
            let status = match self.cached_status(&key).await? {
                Some(status) => status,
                None => classify_mastery(
                    &self.store.load_evidence(&key).await?,
                    &self.config.sprt_bounds,
                    &self.config.sprt_hypotheses,
                ),
            };
            overview.push(SkillMastery {
                skill_id,
                belief,
                mastery_probability: belief.mastery_probability(),
                status,
            });
        }
        Ok(overview)
    }
}

fn question_slot(user_id: &str, course_id: &str, question_id: &str) -> QuestionSlot {
    (user_id.to_string(), course_id.to_string(), question_id.to_string())
}

fn report_alarm(key: &BeliefKey, alarm: &CusumAlarm) {
    tracing::info!(
        key = %key,
        direction = ?alarm.direction,
        score = alarm.score,
        observations = alarm.observations,
        "performance drift detected"
    );
}

fn report_status(key: &BeliefKey, previous: Option<MasteryStatus>, status: MasteryStatus) {
    if previous != Some(status) {
        tracing::info!(key = %key, status = status.as_str(), "mastery status changed");
    }
}

fn validate_key(key: &BeliefKey) -> Result<(), MasteryError> {
    if key.user_id.trim().is_empty() {
        return Err(MasteryError::Validation("user id is required".to_string()));
    }
    if key.course_id.trim().is_empty() {
        return Err(MasteryError::Validation("course id is required".to_string()));
    }
    Ok(())
}

/// Checks the whole event up front so a rejected attempt changes nothing.
pub fn validate_event(event: &AttemptEvent) -> Result<AttemptRecord, MasteryError> {
    if event.user_id.trim().is_empty() {
        return Err(MasteryError::Validation("user id is required".to_string()));
    }
    if event.course_id.trim().is_empty() {
        return Err(MasteryError::Validation("course id is required".to_string()));
    }
    if event.question_id.trim().is_empty() {
        return Err(MasteryError::Validation("question id is required".to_string()));
    }
    if event.skill_ids.is_empty() {
        return Err(MasteryError::Validation(
            "attempt must be tagged with at least one skill".to_string(),
        ));
    }
    let difficulty = Difficulty::new(event.difficulty)?;
    event.scaling_type.parse::<ScalingType>()?;
    if let Some(rt) = event.response_time_ms {
        if rt < 0 {
            return Err(MasteryError::Validation(format!(
                "response time must not be negative, got {rt}"
            )));
        }
    }

    let mut skill_ids = event.skill_ids.clone();
    skill_ids.sort_unstable();
    skill_ids.dedup();

    Ok(AttemptRecord {
        user_id: event.user_id.clone(),
        question_id: event.question_id.clone(),
        course_id: event.course_id.clone(),
        skill_ids,
        finished: event.finished,
        is_correct: event.is_correct,
        difficulty,
        response_time_ms: event.response_time_ms,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}
