//! Adaptive diagnostic testing
//!
//! Contains:
//! - SkillDependencyGraph - immutable prerequisite graph with topic lookup
//! - QuestionBank - read-only question corpus indexed by skill
//! - DiagnosticSession - per-learner session state and summary records
//! - DiagnosticController - test generation, difficulty ratchet, score propagation

pub mod bank;
pub mod controller;
pub mod graph;
pub mod session;

pub use bank::{BankQuestion, QuestionBank};
pub use controller::{AnswerOutcome, DiagnosticController, DiagnosticError};
pub use graph::{EdgeGroup, GraphError, SkillCatalog, SkillDependencyGraph, SkillEntry};
pub use session::{
    DiagnosticQuestion, DiagnosticResponse, DiagnosticSession, SessionStatus, SessionSummary,
    TopicResult, DEFAULT_SKILL_SCORE, INITIAL_DIFFICULTY,
};
