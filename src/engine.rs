use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::diagnostic::{DiagnosticController, QuestionBank, SkillDependencyGraph};
use crate::mastery::MasteryEstimator;
use crate::store::{DiagnosticStore, MasteryStore, MemoryStore, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryStore>),
    Sqlite(Arc<SqliteStore>),
}

/// Both engines over one shared store.
pub struct TutorEngine {
    mastery: MasteryEstimator,
    diagnostic: DiagnosticController,
    backend: Backend,
}

impl TutorEngine {
    /// Opens SQLite when `config.database_url` is set, the in-memory store otherwise.
    pub async fn open(
        config: &Config,
        graph: SkillDependencyGraph,
        bank: QuestionBank,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let engine = match config.database_url.as_deref() {
            Some(url) => {
                let store = Arc::new(SqliteStore::connect(url).await?);
                Self::build(config, graph, bank, Backend::Sqlite(store))
            }
            None => Self::build(config, graph, bank, Backend::Memory(Arc::new(MemoryStore::new()))),
        };
        tracing::info!(
            backend = engine.backend_name(),
            skills = engine.diagnostic.graph().len(),
            "tutor engine opened"
        );
        Ok(engine)
    }

    /// In-memory engine; handy for tests and embedders without a database.
    pub fn in_memory(config: &Config, graph: SkillDependencyGraph, bank: QuestionBank) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::build(config, graph, bank, Backend::Memory(Arc::new(MemoryStore::new()))))
    }

    fn build(config: &Config, graph: SkillDependencyGraph, bank: QuestionBank, backend: Backend) -> Self {
        let mastery_store: Arc<dyn MasteryStore> = match &backend {
            Backend::Memory(store) => store.clone(),
            Backend::Sqlite(store) => store.clone(),
        };
        let diagnostic_store: Arc<dyn DiagnosticStore> = match &backend {
            Backend::Memory(store) => store.clone(),
            Backend::Sqlite(store) => store.clone(),
        };
        Self {
            mastery: MasteryEstimator::new(mastery_store, config.mastery.clone()),
            diagnostic: DiagnosticController::new(
                Arc::new(graph),
                Arc::new(bank),
                diagnostic_store,
                config.diagnostic.clone(),
            ),
            backend,
        }
    }

    pub fn mastery(&self) -> &MasteryEstimator {
        &self.mastery
    }

    pub fn diagnostic(&self) -> &DiagnosticController {
        &self.diagnostic
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Sqlite(_) => "sqlite",
        }
    }

    pub async fn close(&self) {
        if let Backend::Sqlite(store) = &self.backend {
            store.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{SkillCatalog, SkillEntry};

    fn tiny_graph() -> SkillDependencyGraph {
        SkillDependencyGraph::from_catalog(SkillCatalog {
            skills: vec![SkillEntry {
                id: 1,
                topic: "t".to_string(),
                topic_name: "Topic".to_string(),
            }],
            edges: Vec::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_without_url_uses_memory() {
        let engine = TutorEngine::open(&Config::default(), tiny_graph(), QuestionBank::default())
            .await
            .unwrap();
        assert_eq!(engine.backend_name(), "memory");
        assert_eq!(engine.diagnostic().graph().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.mastery.exponential_base = 1.0;
        let err = TutorEngine::open(&config, tiny_graph(), QuestionBank::default()).await;
        assert!(matches!(err, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_in_memory_engine_tracks_beliefs() {
        let engine = TutorEngine::in_memory(&Config::default(), tiny_graph(), QuestionBank::default()).unwrap();
        let key = crate::mastery::BeliefKey::new("u", 1, "c");
        engine
            .mastery()
            .update_from_attempt(&key, None, true, false, 2, "linear")
            .await
            .unwrap();
        assert_eq!(engine.mastery().get_belief(&key).await.unwrap().beta, 42.0);
        assert!(engine.diagnostic().skill_scores("u").await.unwrap().is_empty());
    }
}
