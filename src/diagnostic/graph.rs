use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mastery::types::SkillId;

/// A skill with at most this many prerequisites counts as foundational.
pub const FOUNDATIONAL_PREREQUISITE_LIMIT: usize = 2;
/// A skill with more dependents than this counts as advanced.
pub const ADVANCED_DEPENDENT_THRESHOLD: usize = 3;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate skill id: {0}")]
    DuplicateSkill(SkillId),
    #[error("edge group {group} references unknown skill {skill}")]
    UnknownSkill { group: usize, skill: SkillId },
    #[error("skill {0} cannot be its own prerequisite")]
    SelfLoop(SkillId),
    #[error("invalid catalog json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub id: SkillId,
    pub topic: String,
    pub topic_name: String,
}

/// Every listed prerequisite is a prerequisite of every listed dependent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeGroup {
    pub prerequisites: Vec<SkillId>,
    pub dependents: Vec<SkillId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillCatalog {
    pub skills: Vec<SkillEntry>,
    #[serde(default)]
    pub edges: Vec<EdgeGroup>,
}

#[derive(Debug, Clone)]
pub struct SkillNode {
    pub id: SkillId,
    pub topic: String,
    pub topic_name: String,
    pub prerequisites: BTreeSet<SkillId>,
    pub dependents: BTreeSet<SkillId>,
}

/// Immutable prerequisite graph, built once and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct SkillDependencyGraph {
    nodes: BTreeMap<SkillId, SkillNode>,
}

impl SkillDependencyGraph {
    pub fn from_catalog(catalog: SkillCatalog) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();
        for skill in catalog.skills {
            if nodes.contains_key(&skill.id) {
                return Err(GraphError::DuplicateSkill(skill.id));
            }
            nodes.insert(
                skill.id,
                SkillNode {
                    id: skill.id,
                    topic: skill.topic,
                    topic_name: skill.topic_name,
                    prerequisites: BTreeSet::new(),
                    dependents: BTreeSet::new(),
                },
            );
        }

        for (group_idx, group) in catalog.edges.iter().enumerate() {
            for &skill in group.prerequisites.iter().chain(group.dependents.iter()) {
                if !nodes.contains_key(&skill) {
                    return Err(GraphError::UnknownSkill {
                        group: group_idx,
                        skill,
                    });
                }
            }
            for &pre in &group.prerequisites {
                for &dep in &group.dependents {
                    if pre == dep {
                        return Err(GraphError::SelfLoop(pre));
                    }
                    if let Some(node) = nodes.get_mut(&dep) {
                        node.prerequisites.insert(pre);
                    }
                    if let Some(node) = nodes.get_mut(&pre) {
                        node.dependents.insert(dep);
                    }
                }
            }
        }

        tracing::debug!(skills = nodes.len(), groups = catalog.edges.len(), "skill graph built");
        Ok(Self { nodes })
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let catalog: SkillCatalog = serde_json::from_str(json)?;
        Self::from_catalog(catalog)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, skill: SkillId) -> bool {
        self.nodes.contains_key(&skill)
    }

    pub fn node(&self, skill: SkillId) -> Option<&SkillNode> {
        self.nodes.get(&skill)
    }

    pub fn skills(&self) -> impl Iterator<Item = SkillId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn prerequisites(&self, skill: SkillId) -> impl Iterator<Item = SkillId> + '_ {
        self.nodes
            .get(&skill)
            .into_iter()
            .flat_map(|node| node.prerequisites.iter().copied())
    }

    pub fn dependents(&self, skill: SkillId) -> impl Iterator<Item = SkillId> + '_ {
        self.nodes
            .get(&skill)
            .into_iter()
            .flat_map(|node| node.dependents.iter().copied())
    }

    pub fn topic(&self, skill: SkillId) -> Option<(&str, &str)> {
        self.nodes
            .get(&skill)
            .map(|node| (node.topic.as_str(), node.topic_name.as_str()))
    }

    pub fn skills_in_topic<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = SkillId> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.topic == topic)
            .map(|node| node.id)
    }

    /// More than `prerequisite_limit` prerequisites or more than `dependent_threshold` dependents.
    pub fn is_advanced_with(&self, skill: SkillId, prerequisite_limit: usize, dependent_threshold: usize) -> bool {
        self.nodes.get(&skill).is_some_and(|node| {
            node.prerequisites.len() > prerequisite_limit || node.dependents.len() > dependent_threshold
        })
    }

    pub fn is_advanced(&self, skill: SkillId) -> bool {
        self.is_advanced_with(skill, FOUNDATIONAL_PREREQUISITE_LIMIT, ADVANCED_DEPENDENT_THRESHOLD)
    }

    /// Known and not advanced.
    pub fn is_foundational(&self, skill: SkillId) -> bool {
        self.contains(skill) && !self.is_advanced(skill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: SkillId, topic: &str) -> SkillEntry {
        SkillEntry {
            id,
            topic: topic.to_string(),
            topic_name: topic.to_uppercase(),
        }
    }

    fn chain_catalog() -> SkillCatalog {
        SkillCatalog {
            skills: (1..=8).map(|id| entry(id, if id <= 4 { "alg" } else { "geo" })).collect(),
            edges: vec![
                EdgeGroup {
                    prerequisites: vec![1, 2, 3],
                    dependents: vec![4],
                },
                EdgeGroup {
                    prerequisites: vec![5],
                    dependents: vec![1, 2, 6, 7],
                },
            ],
        }
    }

    #[test]
    fn test_edge_groups_expand_to_pairs() {
        let graph = SkillDependencyGraph::from_catalog(chain_catalog()).unwrap();
        assert_eq!(graph.prerequisites(4).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(graph.dependents(5).collect::<Vec<_>>(), vec![1, 2, 6, 7]);
        assert_eq!(graph.dependents(1).collect::<Vec<_>>(), vec![4]);
        assert_eq!(graph.prerequisites(8).count(), 0);
    }

    #[test]
    fn test_classification() {
        let graph = SkillDependencyGraph::from_catalog(chain_catalog()).unwrap();
        assert!(graph.is_advanced(4), "three prerequisites");
        assert!(graph.is_advanced(5), "four dependents");
        assert!(graph.is_foundational(1));
        assert!(graph.is_foundational(8));
        assert!(!graph.is_foundational(99));
    }

    #[test]
    fn test_topics() {
        let graph = SkillDependencyGraph::from_catalog(chain_catalog()).unwrap();
        assert_eq!(graph.topic(6), Some(("geo", "GEO")));
        assert_eq!(graph.skills_in_topic("alg").count(), 4);
    }

    #[test]
    fn test_rejects_bad_catalogs() {
        let mut dup = chain_catalog();
        dup.skills.push(entry(1, "alg"));
        assert!(matches!(
            SkillDependencyGraph::from_catalog(dup),
            Err(GraphError::DuplicateSkill(1))
        ));

        let mut unknown = chain_catalog();
        unknown.edges.push(EdgeGroup {
            prerequisites: vec![1],
            dependents: vec![42],
        });
        assert!(matches!(
            SkillDependencyGraph::from_catalog(unknown),
            Err(GraphError::UnknownSkill { skill: 42, .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "skills": [
                {"id": 1, "topic": "t1", "topic_name": "Fractions"},
                {"id": 2, "topic": "t1", "topic_name": "Fractions"}
            ],
            "edges": [{"prerequisites": [1], "dependents": [2]}]
        }"#;
        let graph = SkillDependencyGraph::from_json(json).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependents(1).collect::<Vec<_>>(), vec![2]);
        assert!(SkillDependencyGraph::from_json("{").is_err());
    }
}
