use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DiagnosticConfig, CORRECT_STREAK_TO_RAISE, INCORRECT_STREAK_TO_LOWER};
use crate::diagnostic::bank::QuestionBank;
use crate::diagnostic::graph::SkillDependencyGraph;
use crate::diagnostic::session::{
    DiagnosticQuestion, DiagnosticResponse, DiagnosticSession, SessionStatus, SessionSummary,
    TopicResult, INITIAL_DIFFICULTY, MAX_SKILL_SCORE, MIN_SKILL_SCORE,
};
use crate::mastery::types::{Difficulty, SkillId};
use crate::store::{DiagnosticStore, StoreError};

const UNKNOWN_TOPIC: &str = "unknown";

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no questions available for a diagnostic test")]
    NoQuestionsAvailable,
    #[error("diagnostic session not found: {0}")]
    SessionNotFound(String),
    #[error("diagnostic session already completed: {0}")]
    SessionCompleted(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl DiagnosticError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DiagnosticError::Validation(_) | DiagnosticError::SessionCompleted(_)
        )
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, DiagnosticError::Storage(_))
    }
}

/// Result of one submitted answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub response: DiagnosticResponse,
    pub difficulty: Difficulty,
    /// Present once the answer closed the session.
    pub summary: Option<SessionSummary>,
}

/// Adaptive diagnostic runner.
///
/// The graph and question bank are shared read-only; per-skill update
/// counts live for as long as the controller does.
pub struct DiagnosticController {
    graph: Arc<SkillDependencyGraph>,
    bank: Arc<QuestionBank>,
    store: Arc<dyn DiagnosticStore>,
    config: DiagnosticConfig,
    update_counts: Mutex<HashMap<SkillId, u32>>,
}

impl DiagnosticController {
    pub fn new(
        graph: Arc<SkillDependencyGraph>,
        bank: Arc<QuestionBank>,
        store: Arc<dyn DiagnosticStore>,
        config: DiagnosticConfig,
    ) -> Self {
        Self {
            graph,
            bank,
            store,
            config,
            update_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &SkillDependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &DiagnosticConfig {
        &self.config
    }

    pub fn update_count(&self, skill_id: SkillId) -> u32 {
        self.update_counts.lock().get(&skill_id).copied().unwrap_or(0)
    }

    fn is_advanced(&self, skill_id: SkillId) -> bool {
        self.graph.is_advanced_with(
            skill_id,
            self.config.foundational_prerequisite_limit,
            self.config.advanced_dependent_threshold,
        )
    }

    /// Samples foundational and advanced skills, one question each, in random order.
    pub fn generate_diagnostic_test<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Vec<DiagnosticQuestion>, DiagnosticError> {
        let total = self.config.question_count;
        let foundational_target = self.config.foundational_count(total).min(total);
        let advanced_target = total - foundational_target;

        let (advanced, foundational): (Vec<SkillId>, Vec<SkillId>) = self
            .graph
            .skills()
            .filter(|&skill| self.bank.has_skill(skill))
            .partition(|&skill| self.is_advanced(skill));

        let mut questions = Vec::with_capacity(total);
        for (pool, target) in [(&foundational, foundational_target), (&advanced, advanced_target)] {
            for &skill in pool.choose_multiple(rng, target) {
                match self.bank.pick(skill, INITIAL_DIFFICULTY, rng) {
                    Some(question) => questions.push(question.to_diagnostic()),
                    None => tracing::debug!(skill_id = skill, "no question for skill, skipped"),
                }
            }
        }

        if questions.is_empty() {
            tracing::warn!(requested = total, "diagnostic generation found no questions");
            return Err(DiagnosticError::NoQuestionsAvailable);
        }
        questions.shuffle(rng);

        if questions.len() < total {
            tracing::info!(
                requested = total,
                selected = questions.len(),
                "diagnostic test shorter than requested"
            );
        }
        Ok(questions)
    }

    /// Streak ratchet over `session.current_difficulty`.
    pub fn adjust_difficulty(session: &mut DiagnosticSession, correct: bool) -> Difficulty {
        if correct {
            session.correct_streak += 1;
            session.incorrect_streak = 0;
            if session.correct_streak >= CORRECT_STREAK_TO_RAISE {
                session.current_difficulty = session.current_difficulty.harder();
                session.correct_streak = 0;
            }
        } else {
            session.incorrect_streak += 1;
            session.correct_streak = 0;
            if session.incorrect_streak >= INCORRECT_STREAK_TO_LOWER {
                session.current_difficulty = session.current_difficulty.easier();
                session.incorrect_streak = 0;
            }
        }
        session.current_difficulty
    }

    /// Applies the decaying delta for `response` and spreads part of it one hop.
    ///
    /// Returns the delta applied to the answered skill.
    pub fn update_skill_estimates(&self, session: &mut DiagnosticSession, response: &DiagnosticResponse) -> f64 {
        let skill = response.skill_id;
        let prior_updates = {
            let mut counts = self.update_counts.lock();
            let count = counts.entry(skill).or_insert(0);
            let prior = *count;
            *count += 1;
            prior
        };

        let magnitude = self.config.base_delta / (1.0 + (1.0 + f64::from(prior_updates)).log2());
        let sign = if response.is_correct { 1.0 } else { -1.0 };
        let delta = magnitude * sign * response.difficulty.as_f64() / 3.0;

        shift_score(session, skill, delta);

        let neighbours: Vec<SkillId> = if response.is_correct {
            self.graph.prerequisites(skill).collect()
        } else {
            self.graph.dependents(skill).collect()
        };
        let spread = delta * self.config.propagation_factor;
        for neighbour in &neighbours {
            shift_score(session, *neighbour, spread);
        }

        tracing::debug!(
            session_id = %session.id,
            skill_id = skill,
            delta,
            propagated_to = neighbours.len(),
            "skill estimate updated"
        );
        delta
    }

    /// Generates a test for `user_id` and persists a new session.
    pub async fn create_session<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        rng: &mut R,
    ) -> Result<DiagnosticSession, DiagnosticError> {
        let questions = self.generate_diagnostic_test(rng)?;
        self.start_session(user_id, questions).await
    }

    /// Persists a new session over an already chosen question list.
    pub async fn start_session(
        &self,
        user_id: &str,
        questions: Vec<DiagnosticQuestion>,
    ) -> Result<DiagnosticSession, DiagnosticError> {
        if user_id.trim().is_empty() {
            return Err(DiagnosticError::Validation("user id must not be empty".to_string()));
        }
        if questions.is_empty() {
            return Err(DiagnosticError::NoQuestionsAvailable);
        }

        let session = DiagnosticSession::new(
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            questions,
            Utc::now().timestamp_millis(),
        );
        self.store.insert_session(&session).await.map_err(|err| {
            tracing::warn!(user_id, error = %err, "failed to persist new diagnostic session");
            err
        })?;

        tracing::info!(
            session_id = %session.id,
            user_id,
            questions = session.questions.len(),
            "diagnostic session created"
        );
        Ok(session)
    }

    pub async fn save_response(
        &self,
        session: &DiagnosticSession,
        response: &DiagnosticResponse,
    ) -> Result<(), DiagnosticError> {
        self.store.append_response(session, response).await.map_err(|err| {
            tracing::warn!(session_id = %session.id, error = %err, "failed to persist response");
            err
        })?;
        Ok(())
    }

    /// Next unanswered question, moved to the current difficulty when the bank allows.
    ///
    /// `None` once the session is completed or fully answered.
    pub fn next_question<R: Rng + ?Sized>(
        &self,
        session: &mut DiagnosticSession,
        rng: &mut R,
    ) -> Option<DiagnosticQuestion> {
        if session.is_complete() {
            return None;
        }
        let index = session.next_index()?;

        let current = &session.questions[index];
        if current.difficulty != session.current_difficulty {
            let taken: Vec<&str> = session
                .questions
                .iter()
                .map(|q| q.question_id.as_str())
                .collect();
            let replacement = self
                .bank
                .pick_exact(current.skill_id, session.current_difficulty, &taken, rng)
                .map(|q| q.to_diagnostic());
            if let Some(replacement) = replacement {
                tracing::debug!(
                    session_id = %session.id,
                    skill_id = replacement.skill_id,
                    difficulty = replacement.difficulty.level(),
                    "question re-targeted"
                );
                session.questions[index] = replacement;
            }
        }
        Some(session.questions[index].clone())
    }

    /// Grades and records the answer to the next unanswered question.
    ///
    /// `session` is only modified once the response is durable. Answering the
    /// last question completes the session.
    pub async fn submit_answer(
        &self,
        session: &mut DiagnosticSession,
        user_answer: &str,
        response_time_seconds: f64,
    ) -> Result<AnswerOutcome, DiagnosticError> {
        if session.is_complete() {
            return Err(DiagnosticError::SessionCompleted(session.id.clone()));
        }
        if !(response_time_seconds.is_finite() && response_time_seconds >= 0.0) {
            return Err(DiagnosticError::Validation(format!(
                "response time must be a non-negative number, got {response_time_seconds}"
            )));
        }
        let Some(index) = session.next_index() else {
            return Err(DiagnosticError::Validation(format!(
                "session {} has no unanswered question",
                session.id
            )));
        };

        let question = session.questions[index].clone();
        let response = DiagnosticResponse {
            is_correct: answers_match(user_answer, &question.answer),
            question_id: question.question_id,
            skill_id: question.skill_id,
            difficulty: question.difficulty,
            user_answer: user_answer.to_string(),
            correct_answer: question.answer,
            response_time_seconds,
            answered_at: Utc::now().timestamp_millis(),
        };

        let mut next = session.clone();
        let difficulty = Self::adjust_difficulty(&mut next, response.is_correct);
        self.update_skill_estimates(&mut next, &response);
        next.responses.push(response.clone());
        self.save_response(&next, &response).await?;
        *session = next;

        let summary = if session.all_answered() {
            Some(self.complete_session(session).await?)
        } else {
            None
        };

        Ok(AnswerOutcome {
            response,
            difficulty,
            summary,
        })
    }

    /// Writes the session's skill scores and marks it completed.
    pub async fn complete_session(&self, session: &mut DiagnosticSession) -> Result<SessionSummary, DiagnosticError> {
        if session.is_complete() {
            return Err(DiagnosticError::SessionCompleted(session.id.clone()));
        }

        let completed_at = Utc::now().timestamp_millis();
        let summary = SessionSummary {
            total_questions: session.responses.len() as u32,
            correct_answers: session.correct_answers(),
            final_difficulty: session.current_difficulty,
            topics: self.topic_breakdown(&session.responses),
            skill_scores: session.rounded_scores(),
            completed_at,
        };

        let scores: HashMap<SkillId, u8> = summary.skill_scores.iter().map(|(&k, &v)| (k, v)).collect();
        self.store
            .save_skill_scores(&session.user_id, &scores)
            .await
            .map_err(|err| {
                tracing::warn!(session_id = %session.id, error = %err, "failed to persist skill scores");
                err
            })?;

        let mut finished = session.clone();
        finished.status = SessionStatus::Completed;
        finished.completed_at = Some(completed_at);
        self.store
            .complete_session(&finished, &summary)
            .await
            .map_err(|err| {
                tracing::warn!(session_id = %session.id, error = %err, "failed to mark session completed");
                err
            })?;
        *session = finished;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            total = summary.total_questions,
            correct = summary.correct_answers,
            final_difficulty = summary.final_difficulty.level(),
            "diagnostic session completed"
        );
        Ok(summary)
    }

    pub async fn load_session(&self, session_id: &str) -> Result<DiagnosticSession, DiagnosticError> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or_else(|| DiagnosticError::SessionNotFound(session_id.to_string()))
    }

    pub async fn skill_scores(&self, user_id: &str) -> Result<HashMap<SkillId, u8>, DiagnosticError> {
        Ok(self.store.load_skill_scores(user_id).await?)
    }

    fn topic_breakdown(&self, responses: &[DiagnosticResponse]) -> Vec<TopicResult> {
        let mut topics: BTreeMap<String, TopicResult> = BTreeMap::new();
        for response in responses {
            let (topic, topic_name) = self
                .graph
                .topic(response.skill_id)
                .unwrap_or((UNKNOWN_TOPIC, UNKNOWN_TOPIC));
            let entry = topics.entry(topic.to_string()).or_insert_with(|| TopicResult {
                topic: topic.to_string(),
                topic_name: topic_name.to_string(),
                answered: 0,
                correct: 0,
            });
            entry.answered += 1;
            if response.is_correct {
                entry.correct += 1;
            }
        }
        topics.into_values().collect()
    }
}

fn shift_score(session: &mut DiagnosticSession, skill: SkillId, delta: f64) {
    let score = (session.skill_score(skill) + delta).clamp(MIN_SKILL_SCORE, MAX_SKILL_SCORE);
    session.skill_updates.insert(skill, score);
}

fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().to_lowercase() == expected.trim().to_lowercase()
}
