//! Storage collaborator for the mastery and diagnostic engines.
//!
//! The engines only need keyed reads and writes; both the in-memory and the
//! SQLite backends implement every trait here.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::diagnostic::session::{DiagnosticResponse, DiagnosticSession, SessionSummary};
use crate::mastery::sequential::CusumState;
use crate::mastery::types::{AttemptRecord, Belief, BeliefKey, Evidence, MasteryStatus, SkillId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub status: MasteryStatus,
    pub log_likelihood_ratio: f64,
    pub updated_at: i64,
}

/// New state of one key produced by an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillWrite {
    pub key: BeliefKey,
    pub belief: Belief,
    pub evidence: Evidence,
    pub cusum: Option<CusumState>,
    pub status: Option<StatusEntry>,
}

impl SkillWrite {
    pub fn new(key: BeliefKey, belief: Belief, evidence: Evidence) -> Self {
        Self {
            key,
            belief,
            evidence,
            cusum: None,
            status: None,
        }
    }
}

#[async_trait]
pub trait BeliefStore: Send + Sync {
    /// `None` when nothing was ever written for the key.
    async fn load_belief(&self, key: &BeliefKey) -> Result<Option<Belief>, StoreError>;

    /// Zero counts when nothing was ever written for the key.
    async fn load_evidence(&self, key: &BeliefKey) -> Result<Evidence, StoreError>;

    async fn load_status(&self, key: &BeliefKey) -> Result<Option<StatusEntry>, StoreError>;

    async fn save_status(&self, key: &BeliefKey, entry: &StatusEntry) -> Result<(), StoreError>;

    async fn load_cusum(&self, key: &BeliefKey) -> Result<Option<CusumState>, StoreError>;

    async fn save_cusum(&self, key: &BeliefKey, state: &CusumState) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AttemptLog: Send + Sync {
    /// Whether `user_id` already solved `question_id` within `course_id`.
    async fn has_correct_attempt(
        &self,
        user_id: &str,
        course_id: &str,
        question_id: &str,
    ) -> Result<bool, StoreError>;

    /// Writes every key's new state and the attempt record as one unit.
    ///
    /// On error nothing from `writes` or `record` is visible afterwards.
    async fn commit_attempt(
        &self,
        writes: &[SkillWrite],
        record: Option<&AttemptRecord>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &DiagnosticSession) -> Result<(), StoreError>;

    /// Persists `response` together with the session's updated progress.
    async fn append_response(
        &self,
        session: &DiagnosticSession,
        response: &DiagnosticResponse,
    ) -> Result<(), StoreError>;

    async fn complete_session(
        &self,
        session: &DiagnosticSession,
        summary: &SessionSummary,
    ) -> Result<(), StoreError>;

    async fn load_session(&self, session_id: &str) -> Result<Option<DiagnosticSession>, StoreError>;
}

#[async_trait]
pub trait SkillScoreStore: Send + Sync {
    async fn load_skill_scores(&self, user_id: &str) -> Result<HashMap<SkillId, u8>, StoreError>;

    async fn save_skill_scores(
        &self,
        user_id: &str,
        scores: &HashMap<SkillId, u8>,
    ) -> Result<(), StoreError>;
}

/// Everything the mastery estimator reads and writes.
pub trait MasteryStore: BeliefStore + AttemptLog {}

impl<T: BeliefStore + AttemptLog + ?Sized> MasteryStore for T {}

/// Everything the diagnostic controller reads and writes.
pub trait DiagnosticStore: SessionStore + SkillScoreStore {}

impl<T: SessionStore + SkillScoreStore + ?Sized> DiagnosticStore for T {}
