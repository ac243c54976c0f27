use std::collections::BTreeMap;

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::diagnostic::session::DiagnosticQuestion;
use crate::mastery::types::{Difficulty, SkillId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankQuestion {
    pub id: String,
    pub skill_id: SkillId,
    pub difficulty: Difficulty,
    pub problem_text: String,
    pub answer: String,
}

impl BankQuestion {
    pub fn to_diagnostic(&self) -> DiagnosticQuestion {
        DiagnosticQuestion {
            question_id: self.id.clone(),
            skill_id: self.skill_id,
            difficulty: self.difficulty,
            problem_text: self.problem_text.clone(),
            answer: self.answer.clone(),
        }
    }
}

/// Read-only question corpus indexed by skill.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    by_skill: BTreeMap<SkillId, Vec<BankQuestion>>,
}

impl QuestionBank {
    pub fn new(questions: impl IntoIterator<Item = BankQuestion>) -> Self {
        let mut by_skill: BTreeMap<SkillId, Vec<BankQuestion>> = BTreeMap::new();
        for question in questions {
            by_skill.entry(question.skill_id).or_default().push(question);
        }
        Self { by_skill }
    }

    pub fn len(&self) -> usize {
        self.by_skill.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_skill.is_empty()
    }

    pub fn for_skill(&self, skill: SkillId) -> &[BankQuestion] {
        self.by_skill.get(&skill).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_skill(&self, skill: SkillId) -> bool {
        !self.for_skill(skill).is_empty()
    }

    /// Random question for `skill` at the difficulty closest to `target`.
    pub fn pick<R: Rng + ?Sized>(&self, skill: SkillId, target: Difficulty, rng: &mut R) -> Option<&BankQuestion> {
        self.pick_excluding(skill, target, &[], rng)
    }

    /// Like [`pick`](Self::pick), skipping question ids in `exclude`.
    pub fn pick_excluding<R: Rng + ?Sized>(
        &self,
        skill: SkillId,
        target: Difficulty,
        exclude: &[&str],
        rng: &mut R,
    ) -> Option<&BankQuestion> {
        let candidates: Vec<&BankQuestion> = self
            .for_skill(skill)
            .iter()
            .filter(|q| !exclude.contains(&q.id.as_str()))
            .collect();
        let distance = |q: &BankQuestion| (i16::from(q.difficulty.level()) - i16::from(target.level())).abs();
        let best = candidates.iter().map(|q| distance(q)).min()?;
        let nearest: Vec<&BankQuestion> = candidates
            .into_iter()
            .filter(|q| distance(q) == best)
            .collect();
        nearest.choose(rng).copied()
    }

    /// Question for `skill` at exactly `difficulty`, if one exists.
    pub fn pick_exact<R: Rng + ?Sized>(
        &self,
        skill: SkillId,
        difficulty: Difficulty,
        exclude: &[&str],
        rng: &mut R,
    ) -> Option<&BankQuestion> {
        let exact: Vec<&BankQuestion> = self
            .for_skill(skill)
            .iter()
            .filter(|q| q.difficulty == difficulty && !exclude.contains(&q.id.as_str()))
            .collect();
        exact.choose(rng).copied()
    }
}
