use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mastery::types::{Difficulty, SkillId};

/// Every diagnostic question starts at this level.
pub const INITIAL_DIFFICULTY: Difficulty = match Difficulty::from_level(2) {
    Some(d) => d,
    None => Difficulty::EASIEST,
};

/// Score assumed for a skill the session has not touched yet.
pub const DEFAULT_SKILL_SCORE: f64 = 50.0;
pub const MIN_SKILL_SCORE: f64 = 0.0;
pub const MAX_SKILL_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticQuestion {
    pub question_id: String,
    pub skill_id: SkillId,
    pub difficulty: Difficulty,
    pub problem_text: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResponse {
    pub question_id: String,
    pub skill_id: SkillId,
    pub difficulty: Difficulty,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub response_time_seconds: f64,
    pub answered_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub topic: String,
    pub topic_name: String,
    pub answered: u32,
    pub correct: u32,
}

impl TopicResult {
    pub fn accuracy(&self) -> f64 {
        if self.answered == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.answered)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_questions: u32,
    pub correct_answers: u32,
    pub final_difficulty: Difficulty,
    pub topics: Vec<TopicResult>,
    pub skill_scores: BTreeMap<SkillId, u8>,
    pub completed_at: i64,
}

/// One adaptive diagnostic run, owned by a single learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSession {
    pub id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub questions: Vec<DiagnosticQuestion>,
    pub responses: Vec<DiagnosticResponse>,
    pub current_difficulty: Difficulty,
    pub correct_streak: u32,
    pub incorrect_streak: u32,
    /// Running 0..=100 scores; rounded when persisted.
    pub skill_updates: BTreeMap<SkillId, f64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl DiagnosticSession {
    pub fn new(id: String, user_id: String, questions: Vec<DiagnosticQuestion>, created_at: i64) -> Self {
        Self {
            id,
            user_id,
            status: SessionStatus::InProgress,
            questions,
            responses: Vec::new(),
            current_difficulty: INITIAL_DIFFICULTY,
            correct_streak: 0,
            incorrect_streak: 0,
            skill_updates: BTreeMap::new(),
            created_at,
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn all_answered(&self) -> bool {
        self.responses.len() >= self.questions.len()
    }

    pub fn next_index(&self) -> Option<usize> {
        if self.all_answered() {
            None
        } else {
            Some(self.responses.len())
        }
    }

    pub fn correct_answers(&self) -> u32 {
        self.responses.iter().filter(|r| r.is_correct).count() as u32
    }

    pub fn skill_score(&self, skill_id: SkillId) -> f64 {
        self.skill_updates
            .get(&skill_id)
            .copied()
            .unwrap_or(DEFAULT_SKILL_SCORE)
    }

    /// Scores as persisted: rounded and clamped to 0..=100.
    pub fn rounded_scores(&self) -> BTreeMap<SkillId, u8> {
        self.skill_updates
            .iter()
            .map(|(&skill, &score)| {
                let score = score.clamp(MIN_SKILL_SCORE, MAX_SKILL_SCORE).round() as u8;
                (skill, score)
            })
            .collect()
    }
}
