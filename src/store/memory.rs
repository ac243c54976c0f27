use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::diagnostic::session::{DiagnosticResponse, DiagnosticSession, SessionStatus, SessionSummary};
use crate::mastery::sequential::CusumState;
use crate::mastery::types::{AttemptRecord, Belief, BeliefKey, Evidence, SkillId};
use crate::store::{
    AttemptLog, BeliefStore, SessionStore, SkillScoreStore, SkillWrite, StatusEntry, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    beliefs: HashMap<BeliefKey, Belief>,
    evidence: HashMap<BeliefKey, Evidence>,
    statuses: HashMap<BeliefKey, StatusEntry>,
    cusum: HashMap<BeliefKey, CusumState>,
    attempts: Vec<AttemptRecord>,
    /// `(user, course, question)` answered correctly at least once.
    solved: HashSet<(String, String, String)>,
    sessions: HashMap<String, DiagnosticSession>,
    summaries: HashMap<String, SessionSummary>,
    skill_scores: HashMap<String, HashMap<SkillId, u8>>,
}

impl Tables {
    fn apply(&mut self, write: &SkillWrite) {
        self.beliefs.insert(write.key.clone(), write.belief);
        self.evidence.insert(write.key.clone(), write.evidence);
        if let Some(cusum) = write.cusum {
            self.cusum.insert(write.key.clone(), cusum);
        }
        if let Some(status) = &write.status {
            self.statuses.insert(write.key.clone(), status.clone());
        }
    }

    fn log_attempt(&mut self, record: &AttemptRecord) {
        if record.finished && record.is_correct {
            self.solved.insert((
                record.user_id.clone(),
                record.course_id.clone(),
                record.question_id.clone(),
            ));
        }
        self.attempts.push(record.clone());
    }
}

/// Process-local store backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_count(&self) -> usize {
        self.tables.read().attempts.len()
    }

    pub fn attempts_for(&self, user_id: &str) -> Vec<AttemptRecord> {
        self.tables
            .read()
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.tables.read().summaries.get(session_id).cloned()
    }
}

#[async_trait]
impl BeliefStore for MemoryStore {
    async fn load_belief(&self, key: &BeliefKey) -> Result<Option<Belief>, StoreError> {
        Ok(self.tables.read().beliefs.get(key).copied())
    }

    async fn load_evidence(&self, key: &BeliefKey) -> Result<Evidence, StoreError> {
        Ok(self.tables.read().evidence.get(key).copied().unwrap_or_default())
    }

    async fn load_status(&self, key: &BeliefKey) -> Result<Option<StatusEntry>, StoreError> {
        Ok(self.tables.read().statuses.get(key).cloned())
    }

    async fn save_status(&self, key: &BeliefKey, entry: &StatusEntry) -> Result<(), StoreError> {
        self.tables.write().statuses.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn load_cusum(&self, key: &BeliefKey) -> Result<Option<CusumState>, StoreError> {
        Ok(self.tables.read().cusum.get(key).copied())
    }

    async fn save_cusum(&self, key: &BeliefKey, state: &CusumState) -> Result<(), StoreError> {
        self.tables.write().cusum.insert(key.clone(), *state);
        Ok(())
    }
}

#[async_trait]
impl AttemptLog for MemoryStore {
    async fn has_correct_attempt(
        &self,
        user_id: &str,
        course_id: &str,
        question_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.tables.read().solved.contains(&(
            user_id.to_string(),
            course_id.to_string(),
            question_id.to_string(),
        )))
    }

    async fn commit_attempt(
        &self,
        writes: &[SkillWrite],
        record: Option<&AttemptRecord>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        for write in writes {
            tables.apply(write);
        }
        if let Some(record) = record {
            tables.log_attempt(record);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &DiagnosticSession) -> Result<(), StoreError> {
        self.tables
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn append_response(
        &self,
        session: &DiagnosticSession,
        response: &DiagnosticResponse,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let stored = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::Corrupt(format!("session {} was never inserted", session.id)))?;
        if session.responses.last() != Some(response) {
            return Err(StoreError::Corrupt(format!(
                "response {} is not the last one of session {}",
                response.question_id, session.id
            )));
        }
        *stored = session.clone();
        Ok(())
    }

    async fn complete_session(
        &self,
        session: &DiagnosticSession,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let mut completed = session.clone();
        completed.status = SessionStatus::Completed;
        completed.completed_at = Some(summary.completed_at);
        tables.sessions.insert(session.id.clone(), completed);
        tables.summaries.insert(session.id.clone(), summary.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<DiagnosticSession>, StoreError> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }
}

#[async_trait]
impl SkillScoreStore for MemoryStore {
    async fn load_skill_scores(&self, user_id: &str) -> Result<HashMap<SkillId, u8>, StoreError> {
        Ok(self
            .tables
            .read()
            .skill_scores
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_skill_scores(
        &self,
        user_id: &str,
        scores: &HashMap<SkillId, u8>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let entry = tables.skill_scores.entry(user_id.to_string()).or_default();
        for (&skill, &score) in scores {
            entry.insert(skill, score.min(100));
        }
        Ok(())
    }
}
