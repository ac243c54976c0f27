mod common;

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{answer_for, memory_controller, sample_bank, sample_graph, FailingStore, ADVANCED_SKILLS};
use tutor_mastery::config::DiagnosticConfig;
use tutor_mastery::diagnostic::{
    BankQuestion, DiagnosticController, DiagnosticError, QuestionBank, SessionStatus, SkillCatalog,
    SkillDependencyGraph, SkillEntry, INITIAL_DIFFICULTY,
};
use tutor_mastery::mastery::Difficulty;

#[test]
fn test_generated_test_splits_foundational_and_advanced() {
    let (_store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(42);
    let questions = controller.generate_diagnostic_test(&mut rng).unwrap();

    assert_eq!(questions.len(), 20);
    let advanced = questions
        .iter()
        .filter(|q| ADVANCED_SKILLS.contains(&q.skill_id))
        .count();
    assert_eq!(advanced, 6);
    assert_eq!(questions.len() - advanced, 14);

    let distinct: HashSet<_> = questions.iter().map(|q| q.skill_id).collect();
    assert_eq!(distinct.len(), questions.len(), "skills are sampled without replacement");
    assert!(questions.iter().all(|q| q.difficulty == INITIAL_DIFFICULTY));
}

#[test]
fn test_initial_difficulty_is_two_whenever_the_bank_has_it() {
    let graph = sample_graph();
    // Even skills carry every level; odd skills start at level 3.
    let questions: Vec<BankQuestion> = graph
        .skills()
        .flat_map(|skill| {
            let lowest = if skill % 2 == 0 { 1 } else { 3 };
            (lowest..=5u8).map(move |level| BankQuestion {
                id: format!("s{skill}-d{level}"),
                skill_id: skill,
                difficulty: Difficulty::from_level(level).expect("level in range"),
                problem_text: format!("skill {skill} at level {level}"),
                answer: answer_for(skill, level),
            })
        })
        .collect();
    let controller = DiagnosticController::new(
        Arc::new(graph),
        Arc::new(QuestionBank::new(questions)),
        Arc::new(FailingStore),
        DiagnosticConfig::default(),
    );

    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        for question in controller.generate_diagnostic_test(&mut rng).unwrap() {
            if question.skill_id % 2 == 0 {
                assert_eq!(question.difficulty, INITIAL_DIFFICULTY, "seed {seed}");
            } else {
                assert_eq!(question.difficulty.level(), 3, "nearest level for skill {}", question.skill_id);
            }
        }
    }
}

#[test]
fn test_generation_order_is_shuffled() {
    let (_store, controller) = memory_controller();
    let orders: HashSet<Vec<u32>> = (0..5)
        .map(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            controller
                .generate_diagnostic_test(&mut rng)
                .unwrap()
                .iter()
                .map(|q| q.skill_id)
                .collect()
        })
        .collect();
    assert!(orders.len() > 1);
}

#[test]
fn test_small_corpus_returns_what_exists() {
    let catalog = SkillCatalog {
        skills: (1..=5)
            .map(|id| SkillEntry {
                id,
                topic: "t".to_string(),
                topic_name: "T".to_string(),
            })
            .collect(),
        edges: Vec::new(),
    };
    let graph = SkillDependencyGraph::from_catalog(catalog).unwrap();
    let bank = sample_bank(&graph);
    let controller = DiagnosticController::new(
        Arc::new(graph),
        Arc::new(bank),
        Arc::new(FailingStore),
        DiagnosticConfig::default(),
    );
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(controller.generate_diagnostic_test(&mut rng).unwrap().len(), 5);
}

#[test]
fn test_empty_corpus_is_reported() {
    let controller = DiagnosticController::new(
        Arc::new(sample_graph()),
        Arc::new(QuestionBank::default()),
        Arc::new(FailingStore),
        DiagnosticConfig::default(),
    );
    let mut rng = StdRng::seed_from_u64(1);
    assert!(matches!(
        controller.generate_diagnostic_test(&mut rng),
        Err(DiagnosticError::NoQuestionsAvailable)
    ));
}

#[tokio::test]
async fn test_full_session_adapts_and_completes() {
    let (store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(7);
    let mut session = controller.create_session("learner", &mut rng).await.unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);

    let mut served = Vec::new();
    let mut summary = None;
    while let Some(question) = controller.next_question(&mut session, &mut rng) {
        served.push(question.difficulty.level());
        let outcome = controller
            .submit_answer(&mut session, &question.answer, 4.5)
            .await
            .unwrap();
        assert!(outcome.response.is_correct);
        summary = outcome.summary;
        if summary.is_some() {
            break;
        }
    }

    assert_eq!(served.len(), 20);
    assert_eq!(&served[..4], &[2, 2, 2, 3]);
    assert_eq!(served[19], 5);

    let summary = summary.expect("last answer completes the session");
    assert_eq!(summary.total_questions, 20);
    assert_eq!(summary.correct_answers, 20);
    assert_eq!(summary.final_difficulty.level(), 5);
    assert_eq!(summary.topics.iter().map(|t| t.answered).sum::<u32>(), 20);
    assert!(summary.topics.iter().all(|t| t.accuracy() == 1.0));
    assert!(session.is_complete());

    let scores = controller.skill_scores("learner").await.unwrap();
    assert!(!scores.is_empty());
    assert!(scores.values().all(|&s| s >= 50));
    assert_eq!(store.summary(&session.id), Some(summary));

    let reloaded = controller.load_session(&session.id).await.unwrap();
    assert_eq!(reloaded.status, SessionStatus::Completed);
    assert_eq!(reloaded.responses.len(), 20);

    let err = controller.submit_answer(&mut session, "late", 1.0).await.unwrap_err();
    assert!(matches!(err, DiagnosticError::SessionCompleted(_)));
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_wrong_answers_lower_difficulty_and_scores() {
    let (_store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(3);
    let mut session = controller.create_session("learner", &mut rng).await.unwrap();

    for _ in 0..2 {
        let question = controller.next_question(&mut session, &mut rng).unwrap();
        let outcome = controller.submit_answer(&mut session, "nope", 2.0).await.unwrap();
        assert!(!outcome.response.is_correct);
        assert!(session.skill_score(question.skill_id) < 50.0);
    }
    assert_eq!(session.current_difficulty.level(), 1);
    assert_eq!(session.incorrect_streak, 0);
}

#[tokio::test]
async fn test_grading_ignores_case_and_whitespace() {
    let (_store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(11);
    let mut session = controller.create_session("learner", &mut rng).await.unwrap();
    let question = controller.next_question(&mut session, &mut rng).unwrap();
    let sloppy = format!("  {}  ", answer_for(question.skill_id, 2).to_uppercase());
    let outcome = controller.submit_answer(&mut session, &sloppy, 1.0).await.unwrap();
    assert!(outcome.response.is_correct);
}

#[tokio::test]
async fn test_session_resumes_from_store() {
    let (_store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(5);
    let mut session = controller.create_session("learner", &mut rng).await.unwrap();
    for _ in 0..3 {
        let question = controller.next_question(&mut session, &mut rng).unwrap();
        controller.submit_answer(&mut session, &question.answer, 3.0).await.unwrap();
    }

    let mut resumed = controller.load_session(&session.id).await.unwrap();
    assert_eq!(resumed, session);
    let question = controller.next_question(&mut resumed, &mut rng).unwrap();
    assert_eq!(question.difficulty.level(), 3);
    controller.submit_answer(&mut resumed, &question.answer, 3.0).await.unwrap();
    assert_eq!(resumed.responses.len(), 4);
}

#[tokio::test]
async fn test_update_counts_outlive_sessions() {
    let (_store, controller) = memory_controller();
    let mut rng = StdRng::seed_from_u64(9);
    let mut total = 0;
    for _ in 0..2 {
        let mut session = controller.create_session("learner", &mut rng).await.unwrap();
        let question = controller.next_question(&mut session, &mut rng).unwrap();
        controller.submit_answer(&mut session, &question.answer, 1.0).await.unwrap();
        total += 1;
        assert!(controller.update_count(question.skill_id) >= 1);
    }
    let counted: u32 = sample_graph().skills().map(|s| controller.update_count(s)).sum();
    assert_eq!(counted, total);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (_store, controller) = memory_controller();
    let err = controller.load_session("missing").await.unwrap_err();
    assert!(matches!(err, DiagnosticError::SessionNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_storage_failure_surfaces_distinctly() {
    let graph = sample_graph();
    let bank = sample_bank(&graph);
    let controller = DiagnosticController::new(
        Arc::new(graph),
        Arc::new(bank),
        Arc::new(FailingStore),
        DiagnosticConfig::default(),
    );
    let mut rng = StdRng::seed_from_u64(2);
    let err = controller.create_session("learner", &mut rng).await.unwrap_err();
    assert!(err.is_storage());

    let err = controller.create_session("  ", &mut rng).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_failed_write_leaves_session_untouched() {
    let graph = sample_graph();
    let bank = sample_bank(&graph);
    let controller = DiagnosticController::new(
        Arc::new(graph),
        Arc::new(bank),
        Arc::new(FailingStore),
        DiagnosticConfig::default(),
    );
    let mut rng = StdRng::seed_from_u64(2);
    let questions = controller.generate_diagnostic_test(&mut rng).unwrap();
    let mut session = tutor_mastery::diagnostic::DiagnosticSession::new(
        "local".to_string(),
        "learner".to_string(),
        questions,
        0,
    );
    let before = session.clone();
    let answer = session.questions[0].answer.clone();
    let err = controller.submit_answer(&mut session, &answer, 1.0).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(session, before);
}
