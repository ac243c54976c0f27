#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use tutor_mastery::config::{DiagnosticConfig, MasteryConfig};
use tutor_mastery::diagnostic::{
    BankQuestion, DiagnosticController, DiagnosticResponse, DiagnosticSession, EdgeGroup,
    QuestionBank, SessionSummary, SkillCatalog, SkillDependencyGraph, SkillEntry,
};
use tutor_mastery::mastery::sequential::CusumState;
use tutor_mastery::mastery::{
    AttemptRecord, Belief, BeliefKey, Difficulty, Evidence, MasteryEstimator, SkillId,
};
use tutor_mastery::store::{
    AttemptLog, BeliefStore, MemoryStore, SessionStore, SkillScoreStore, SkillWrite, StatusEntry,
    StoreError,
};

pub const FOUNDATIONAL_SKILLS: std::ops::RangeInclusive<SkillId> = 1..=20;
pub const ADVANCED_SKILLS: std::ops::RangeInclusive<SkillId> = 101..=108;

/// 20 foundational arithmetic skills and 8 algebra skills with three prerequisites each.
pub fn sample_catalog() -> SkillCatalog {
    let mut skills: Vec<SkillEntry> = FOUNDATIONAL_SKILLS
        .map(|id| SkillEntry {
            id,
            topic: "arith".to_string(),
            topic_name: "Arithmetic".to_string(),
        })
        .collect();
    skills.extend(ADVANCED_SKILLS.map(|id| SkillEntry {
        id,
        topic: "alg".to_string(),
        topic_name: "Algebra".to_string(),
    }));

    let foundational: Vec<SkillId> = FOUNDATIONAL_SKILLS.collect();
    let edges = ADVANCED_SKILLS
        .enumerate()
        .map(|(i, id)| EdgeGroup {
            prerequisites: (0..3).map(|k| foundational[(3 * i + k) % foundational.len()]).collect(),
            dependents: vec![id],
        })
        .collect();

    SkillCatalog { skills, edges }
}

pub fn sample_graph() -> SkillDependencyGraph {
    SkillDependencyGraph::from_catalog(sample_catalog()).expect("sample catalog is valid")
}

pub fn answer_for(skill: SkillId, level: u8) -> String {
    format!("ans-{skill}-{level}")
}

/// One question per skill and difficulty level.
pub fn sample_bank(graph: &SkillDependencyGraph) -> QuestionBank {
    let questions: Vec<BankQuestion> = graph
        .skills()
        .flat_map(|skill| {
            (1..=5u8).map(move |level| BankQuestion {
                id: format!("s{skill}-d{level}"),
                skill_id: skill,
                difficulty: Difficulty::from_level(level).expect("level in range"),
                problem_text: format!("skill {skill} at level {level}"),
                answer: answer_for(skill, level),
            })
        })
        .collect();
    QuestionBank::new(questions)
}

pub fn memory_estimator() -> (Arc<MemoryStore>, MasteryEstimator) {
    let store = Arc::new(MemoryStore::new());
    let estimator = MasteryEstimator::new(store.clone(), MasteryConfig::default());
    (store, estimator)
}

pub fn memory_controller() -> (Arc<MemoryStore>, DiagnosticController) {
    let store = Arc::new(MemoryStore::new());
    let graph = sample_graph();
    let bank = sample_bank(&graph);
    let controller = DiagnosticController::new(
        Arc::new(graph),
        Arc::new(bank),
        store.clone(),
        DiagnosticConfig::default(),
    );
    (store, controller)
}

pub fn key(user: &str, skill: SkillId) -> BeliefKey {
    BeliefKey::new(user, skill, "course-1")
}

/// Store whose every call fails as if the backend were down.
pub struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable("backend down".to_string())
}

#[async_trait]
impl BeliefStore for FailingStore {
    async fn load_belief(&self, _key: &BeliefKey) -> Result<Option<Belief>, StoreError> {
        Err(down())
    }

    async fn load_evidence(&self, _key: &BeliefKey) -> Result<Evidence, StoreError> {
        Err(down())
    }

    async fn load_status(&self, _key: &BeliefKey) -> Result<Option<StatusEntry>, StoreError> {
        Err(down())
    }

    async fn save_status(&self, _key: &BeliefKey, _entry: &StatusEntry) -> Result<(), StoreError> {
        Err(down())
    }

    async fn load_cusum(&self, _key: &BeliefKey) -> Result<Option<CusumState>, StoreError> {
        Err(down())
    }

    async fn save_cusum(&self, _key: &BeliefKey, _state: &CusumState) -> Result<(), StoreError> {
        Err(down())
    }
}

#[async_trait]
impl AttemptLog for FailingStore {
    async fn has_correct_attempt(
        &self,
        _user_id: &str,
        _course_id: &str,
        _question_id: &str,
    ) -> Result<bool, StoreError> {
        Err(down())
    }

    async fn commit_attempt(
        &self,
        _writes: &[SkillWrite],
        _record: Option<&AttemptRecord>,
    ) -> Result<(), StoreError> {
        Err(down())
    }
}

#[async_trait]
impl SessionStore for FailingStore {
    async fn insert_session(&self, _session: &DiagnosticSession) -> Result<(), StoreError> {
        Err(down())
    }

    async fn append_response(
        &self,
        _session: &DiagnosticSession,
        _response: &DiagnosticResponse,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn complete_session(
        &self,
        _session: &DiagnosticSession,
        _summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn load_session(&self, _session_id: &str) -> Result<Option<DiagnosticSession>, StoreError> {
        Err(down())
    }
}

#[async_trait]
impl SkillScoreStore for FailingStore {
    async fn load_skill_scores(&self, _user_id: &str) -> Result<HashMap<SkillId, u8>, StoreError> {
        Err(down())
    }

    async fn save_skill_scores(&self, _user_id: &str, _scores: &HashMap<SkillId, u8>) -> Result<(), StoreError> {
        Err(down())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Every commit is refused.
    Commit,
    /// Reading the CUSUM state of this skill fails.
    CusumRead(SkillId),
}

/// In-memory store that fails at one chosen point until healed.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail: Mutex<Option<FailPoint>>,
}

impl FlakyStore {
    pub fn new(fail: FailPoint) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail: Mutex::new(Some(fail)),
        }
    }

    pub fn heal(&self) {
        *self.fail.lock() = None;
    }

    fn fails_at(&self, point: FailPoint) -> bool {
        *self.fail.lock() == Some(point)
    }
}

#[async_trait]
impl BeliefStore for FlakyStore {
    async fn load_belief(&self, key: &BeliefKey) -> Result<Option<Belief>, StoreError> {
        self.inner.load_belief(key).await
    }

    async fn load_evidence(&self, key: &BeliefKey) -> Result<Evidence, StoreError> {
        self.inner.load_evidence(key).await
    }

    async fn load_status(&self, key: &BeliefKey) -> Result<Option<StatusEntry>, StoreError> {
        self.inner.load_status(key).await
    }

    async fn save_status(&self, key: &BeliefKey, entry: &StatusEntry) -> Result<(), StoreError> {
        self.inner.save_status(key, entry).await
    }

    async fn load_cusum(&self, key: &BeliefKey) -> Result<Option<CusumState>, StoreError> {
        if self.fails_at(FailPoint::CusumRead(key.skill_id)) {
            return Err(down());
        }
        self.inner.load_cusum(key).await
    }

    async fn save_cusum(&self, key: &BeliefKey, state: &CusumState) -> Result<(), StoreError> {
        self.inner.save_cusum(key, state).await
    }
}

#[async_trait]
impl AttemptLog for FlakyStore {
    async fn has_correct_attempt(
        &self,
        user_id: &str,
        course_id: &str,
        question_id: &str,
    ) -> Result<bool, StoreError> {
        self.inner.has_correct_attempt(user_id, course_id, question_id).await
    }

    async fn commit_attempt(
        &self,
        writes: &[SkillWrite],
        record: Option<&AttemptRecord>,
    ) -> Result<(), StoreError> {
        if self.fails_at(FailPoint::Commit) {
            return Err(down());
        }
        self.inner.commit_attempt(writes, record).await
    }
}
