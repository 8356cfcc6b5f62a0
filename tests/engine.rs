mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{handbook, orchestrator, test_config, ScriptedModel};
use docent::config::Config;
use docent::error::EngineError;
use docent::llm::{ChatRole, DisabledModel};
use docent::orchestrator::{OrchestratorSettings, QueryOrchestrator, QueryOutcome, QueryState};
use docent::prompts::{general_system_prompt, ATTACH_DOCUMENT_MESSAGE, PARTIAL_ANSWER_PREFIX};
use docent::store::{MemoryObjectStore, ObjectStore};
use docent_core::cache::{cache_key, DocumentCache};
use docent_core::clock::ManualClock;
use docent_core::cost::{BudgetStatus, CostMonitor};
use docent_core::models::{DocumentKind, Operation};

const CHAPTER_3_QUESTION: &str = "What does chapter 3 say about leave requests?";

fn headings(message: &str) -> HashSet<String> {
    message
        .lines()
        .filter_map(|line| line.strip_prefix("=== ")?.strip_suffix(" ==="))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_chapter_question_sends_only_selected_sections() {
    let model = Arc::new(ScriptedModel::new(&["Two weeks in advance, through the portal."]));
    let engine = orchestrator(model.clone(), &test_config());

    let summary = engine
        .process_document("s1", &handbook(), "handbook.txt")
        .await
        .unwrap();
    assert_eq!(summary.kind, DocumentKind::Large);
    assert_eq!(summary.sections, 6);
    assert!(!summary.from_cache);

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert_eq!(answer.answer, "Two weeks in advance, through the portal.");
    assert_eq!(answer.rounds, 1);
    assert_eq!(answer.model_calls, 1);
    assert!(answer.cost_usd > 0.0);
    assert!(answer.sections.contains(&"Chapter 3: Leave requests".to_string()));
    assert!(answer.sections.len() <= 3);
    assert_eq!(
        answer.states,
        vec![
            QueryState::Idle,
            QueryState::Analyzing,
            QueryState::NeedsDoc,
            QueryState::Retrieving,
            QueryState::Responding,
            QueryState::Done,
        ]
    );

    let sent = model.user_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].matches("=== Chapter 3: Leave requests ===").count(), 1);
    assert!(sent[0].ends_with(CHAPTER_3_QUESTION));
    let headings = sent[0].matches("\n=== ").count();
    assert!(headings < 6, "the whole handbook was sent");

    let costs = engine.costs().get_summary();
    assert_eq!(costs.total_operations, 1);
    assert_eq!(costs.by_operation[&Operation::Answer].count, 1);
}

#[tokio::test]
async fn test_escalation_is_bounded() {
    let mut config = test_config();
    config.retrieval.max_sections = 1;
    let model = Arc::new(ScriptedModel::new(&[]).with_fallback("NEED_MORE_CHUNKS: overtime pay rates"));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    let max_rounds = config.orchestrator.max_rounds;

    assert_eq!(answer.outcome, QueryOutcome::Partial);
    assert_eq!(answer.model_calls, max_rounds + 1);
    assert_eq!(answer.rounds, max_rounds + 1);
    assert!(answer.answer.starts_with(PARTIAL_ANSWER_PREFIX));
    assert!(answer.answer.contains("overtime pay rates"));
    assert_eq!(
        answer
            .states
            .iter()
            .filter(|s| **s == QueryState::AwaitingMoreContext)
            .count(),
        max_rounds
    );

    let costs = engine.costs().get_summary();
    assert_eq!(costs.by_operation[&Operation::Answer].count, 1);
    assert_eq!(costs.by_operation[&Operation::Escalation].count, max_rounds as u64);
}

#[tokio::test]
async fn test_escalation_supplies_unseen_sections() {
    let mut config = test_config();
    config.retrieval.max_sections = 1;
    let model = Arc::new(ScriptedModel::new(&[
        "NEED_MORE_CHUNKS: travel receipts",
        "Receipts are filed within one month.",
    ]));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert_eq!(answer.rounds, 2);
    assert_eq!(answer.answer, "Receipts are filed within one month.");

    let sent = model.user_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("=== Chapter 3: Leave requests ==="));
    assert!(!sent[0].contains("=== Chapter 5: Travel ==="));
    assert!(sent[1].contains("=== Chapter 3: Leave requests ==="));
    assert!(sent[1].contains("=== Chapter 5: Travel ==="));

    let snapshot = engine.debug_snapshot("s1").await.unwrap();
    assert_eq!(snapshot.used_section_ids.len(), 2);
}

#[tokio::test]
async fn test_escalation_stops_when_sections_run_out() {
    let mut config = test_config();
    config.retrieval.max_sections = 3;
    let model = Arc::new(ScriptedModel::new(&[]).with_fallback("NEED_MORE_CHUNKS: the annual bonus"));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Partial);
    // Two rounds of three sections cover all six chapters.
    assert_eq!(answer.model_calls, 2);
    assert!(answer.answer.contains("the annual bonus"));
}

#[tokio::test]
async fn test_escalation_at_default_budget_sends_new_sections() {
    let mut config = Config::default();
    config.cache.sweep_interval_secs = 0;
    let model = Arc::new(ScriptedModel::new(&[
        "NEED_MORE_CHUNKS: travel receipts",
        "Receipts are filed within one month.",
    ]));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert_eq!(answer.rounds, 2);

    let sent: Vec<HashSet<String>> = model.user_messages().iter().map(|m| headings(m)).collect();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("Chapter 3: Leave requests"));
    assert!(
        sent[1].difference(&sent[0]).next().is_some(),
        "escalation resent the same sections: {:?}",
        sent[1]
    );
    assert!(sent[1].contains("Chapter 5: Travel"));

    let document = engine
        .cache()
        .get(&cache_key(&handbook(), "handbook.txt"))
        .unwrap();
    let snapshot = engine.debug_snapshot("s1").await.unwrap();
    assert!(!snapshot.used_section_ids.is_empty());
    for id in &snapshot.used_section_ids {
        let title = &document.section(id).unwrap().title;
        assert!(
            sent.iter().any(|h| h.contains(title)),
            "{} marked used but never sent",
            title
        );
    }
}

#[tokio::test]
async fn test_auxiliary_calls_sit_outside_the_round_bound() {
    let mut config = test_config();
    config.retrieval.selection = docent::config::SelectionMode::Model;
    config.retrieval.max_sections = 1;
    let model = Arc::new(
        ScriptedModel::new(&[
            r#"{"needs_document": true, "confidence": 0.9, "reasoning": "asks about the premises"}"#,
            r#"{"selected_sections": [2], "justification": "office hours"}"#,
        ])
        .with_fallback("NEED_MORE_CHUNKS: visitor parking"),
    );
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", "Where can visitors park?").await.unwrap();
    let max_rounds = config.orchestrator.max_rounds;
    assert_eq!(answer.outcome, QueryOutcome::Partial);
    assert_eq!(answer.rounds, max_rounds + 1);
    assert_eq!(answer.model_calls, max_rounds + 3);

    let costs = engine.costs().get_summary();
    assert_eq!(costs.by_operation[&Operation::Classification].count, 1);
    assert_eq!(costs.by_operation[&Operation::Selection].count, 1);
    assert_eq!(costs.by_operation[&Operation::Answer].count, 1);
    assert_eq!(costs.by_operation[&Operation::Escalation].count, max_rounds as u64);
}

#[tokio::test]
async fn test_idle_sessions_are_evicted() {
    let mut config = test_config();
    config.orchestrator.session_idle_secs = 60;
    let clock = Arc::new(ManualClock::default());
    let engine = orchestrator(Arc::new(ScriptedModel::new(&[])), &config).with_clock(clock.clone());

    engine.process_query("s1", "Hi").await.unwrap();
    clock.advance(chrono::Duration::seconds(30));
    engine.process_query("s2", "Hello").await.unwrap();
    assert_eq!(engine.evict_idle_sessions(), 0);

    clock.advance(chrono::Duration::seconds(31));
    assert_eq!(engine.evict_idle_sessions(), 1);
    assert!(engine.debug_snapshot("s1").await.is_none());
    assert!(engine.debug_snapshot("s2").await.is_some());
    assert_eq!(engine.stats().sessions, 1);
}

#[tokio::test]
async fn test_question_without_document_needs_no_model_call() {
    let model = Arc::new(ScriptedModel::new(&[]));
    let engine = orchestrator(model.clone(), &test_config());

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::NoDocument);
    assert_eq!(answer.answer, ATTACH_DOCUMENT_MESSAGE);
    assert_eq!(answer.model_calls, 0);
    assert_eq!(answer.cost_usd, 0.0);
    assert!(model.calls().is_empty());
    assert_eq!(engine.costs().get_summary().total_operations, 0);
}

#[tokio::test]
async fn test_greeting_is_answered_without_document_context() {
    let model = Arc::new(ScriptedModel::new(&["Hello! How can I help?"]));
    let engine = orchestrator(model.clone(), &test_config());
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", "Hello!").await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::General);
    assert!(!answer.analysis.needs_document);
    assert!(answer.states.contains(&QueryState::NoDocNeeded));

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].role, ChatRole::System);
    assert_eq!(calls[0][0].content, general_system_prompt());
    assert!(!calls[0].iter().any(|m| m.content.contains("DOCUMENT CONTEXT")));
    assert_eq!(engine.costs().get_summary().by_operation[&Operation::General].count, 1);
}

#[tokio::test]
async fn test_uncertain_question_is_classified_by_model() {
    let model = Arc::new(ScriptedModel::new(&[
        r#"{"needs_document": true, "confidence": 0.95, "reasoning": "asks about parking rules"}"#,
        "Visitors park in the north lot.",
    ]));
    let engine = orchestrator(model.clone(), &test_config());
    let summary = engine
        .process_document(
            "s1",
            "Parking rules. Visitors park in the north lot. Staff park underground.",
            "parking.txt",
        )
        .await
        .unwrap();
    assert_eq!(summary.kind, DocumentKind::Small);

    let answer = engine.process_query("s1", "Where can visitors park?").await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert_eq!(answer.analysis.confidence, 0.95);
    assert_eq!(answer.model_calls, 2);

    let sent = model.user_messages();
    assert!(sent[1].starts_with("DOCUMENT CONTEXT: full document"));
    let costs = engine.costs().get_summary();
    assert_eq!(costs.by_operation[&Operation::Classification].count, 1);
    assert_eq!(costs.by_operation[&Operation::Answer].count, 1);
}

#[tokio::test]
async fn test_unparseable_classification_keeps_local_verdict() {
    let model = Arc::new(ScriptedModel::new(&["I am not sure, maybe?", "North lot."]));
    let engine = orchestrator(model.clone(), &test_config());
    engine
        .process_document("s1", "Parking rules. Visitors park in the north lot.", "parking.txt")
        .await
        .unwrap();

    let answer = engine.process_query("s1", "Where can visitors park?").await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert!(answer.analysis.needs_document);
    assert!(answer.analysis.confidence < 0.7);
    assert_eq!(answer.answer, "North lot.");
}

#[tokio::test]
async fn test_repeated_document_is_served_from_cache() {
    let model = Arc::new(ScriptedModel::new(&[]));
    let engine = orchestrator(model, &test_config());
    let text = handbook();

    let first = engine.process_document("s1", &text, "handbook.txt").await.unwrap();
    let second = engine.process_document("s2", &text, "handbook.txt").await.unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.id, second.id);

    let stats = engine.stats();
    assert_eq!(stats.documents_processed, 1);
    assert_eq!(stats.cache.entries, 1);
    assert_eq!(stats.cache.hits, 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let model = Arc::new(ScriptedModel::new(&[]));
    let engine = orchestrator(model, &test_config());
    engine.process_document("alice", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("bob", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::NoDocument);
    assert!(engine.active_document("bob").await.is_none());
    assert_eq!(engine.active_document("alice").await.unwrap().name, "handbook.txt");

    assert!(engine.clear_session("alice"));
    assert!(engine.active_document("alice").await.is_none());
    assert!(!engine.clear_session("alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queries_in_one_session_run_one_at_a_time() {
    let model = Arc::new(ScriptedModel::new(&[]).with_delay(Duration::from_millis(50)));
    let engine = Arc::new(orchestrator(model.clone(), &test_config()));

    let a = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.process_query("s1", "Hello!").await })
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.process_query("s1", "Thanks!").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(model.calls().len(), 2);
    assert_eq!(model.max_in_flight(), 1);
    assert_eq!(engine.debug_snapshot("s1").await.unwrap().query_count, 2);
}

#[tokio::test]
async fn test_history_is_replayed() {
    let model = Arc::new(ScriptedModel::new(&["Hi there.", "You said hello."]));
    let engine = orchestrator(model.clone(), &test_config());

    engine.process_query("s1", "Hello!").await.unwrap();
    engine.process_query("s1", "Thanks!").await.unwrap();

    let calls = model.calls();
    assert_eq!(calls[1].len(), 4);
    assert_eq!(calls[1][1].content, "Hello!");
    assert_eq!(calls[1][2].role, ChatRole::Assistant);
    assert_eq!(calls[1][2].content, "Hi there.");
}

#[tokio::test]
async fn test_exceeded_budget_blocks_calls_when_enforced() {
    let mut config = test_config();
    config.cost.enforce_budget = true;
    config.cost.daily_budget_usd = 0.01;
    let model = Arc::new(ScriptedModel::new(&[]).with_usage(1_000_000, 0));
    let engine = orchestrator(model.clone(), &config);

    let first = engine.process_query("s1", "Hello!").await.unwrap();
    assert!((first.cost_usd - 0.15).abs() < 1e-9);
    assert_eq!(engine.costs().budget_status(), BudgetStatus::Exceeded);

    let err = engine.process_query("s1", "Hello again!").await.unwrap_err();
    assert!(matches!(err, EngineError::BudgetExceeded { .. }));
    assert_eq!(err.code(), "budget_exceeded");
    assert_eq!(model.calls().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_propagates() {
    let config = test_config();
    let engine = QueryOrchestrator::new(
        Arc::new(DisabledModel),
        Arc::new(DocumentCache::new((&config.cache).into())),
        Arc::new(CostMonitor::new((&config.cost).into())),
        OrchestratorSettings::from(&config),
    );
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let err = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)));
    assert_eq!(engine.costs().get_summary().total_operations, 0);
}

#[tokio::test]
async fn test_model_selection_picks_sections() {
    let mut config = test_config();
    config.retrieval.selection = docent::config::SelectionMode::Model;
    let model = Arc::new(ScriptedModel::new(&[
        r#"{"selected_sections": [5], "justification": "travel rules"}"#,
        "Book through the travel desk.",
    ]));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine
        .process_query("s1", "What does the handbook say about booking trips?")
        .await
        .unwrap();
    assert_eq!(answer.sections, vec!["Chapter 5: Travel".to_string()]);
    assert_eq!(engine.costs().get_summary().by_operation[&Operation::Selection].count, 1);
}

#[tokio::test]
async fn test_unusable_model_selection_falls_back_to_ranking() {
    let mut config = test_config();
    config.retrieval.selection = docent::config::SelectionMode::Model;
    let model = Arc::new(ScriptedModel::new(&["none of them look relevant", "Two weeks."]));
    let engine = orchestrator(model.clone(), &config);
    engine.process_document("s1", &handbook(), "handbook.txt").await.unwrap();

    let answer = engine.process_query("s1", CHAPTER_3_QUESTION).await.unwrap();
    assert_eq!(answer.outcome, QueryOutcome::Answered);
    assert_eq!(answer.model_calls, 2);
    assert!(answer.sections.contains(&"Chapter 3: Leave requests".to_string()));
}

#[tokio::test]
async fn test_model_assisted_division_for_unstructured_text() {
    let mut config = test_config();
    config.segmentation.model_assisted = true;
    let sentence = "Rates are reviewed every spring by the finance team and published afterwards.";
    let mut text = String::from("Opening remarks about pay. ");
    text.push_str(&vec![sentence; 150].join(" "));
    text.push_str(" Closing notes on bonuses. ");
    text.push_str(&vec![sentence; 150].join(" "));

    let plan = r#"{"divisions": [
        {"title": "Pay", "start_text": "Opening remarks about pay."},
        {"title": "Bonuses", "start_text": "Closing notes on bonuses."}
    ]}"#;
    let model = Arc::new(ScriptedModel::new(&[plan]));
    let engine = orchestrator(model.clone(), &config);

    let summary = engine.process_document("s1", &text, "pay.txt").await.unwrap();
    assert_eq!(summary.kind, DocumentKind::Large);
    assert_eq!(summary.sections, 2);
    assert_eq!(
        summary.strategy,
        Some(docent_core::segment::DivisionStrategy::ModelAssisted)
    );
    assert_eq!(engine.costs().get_summary().by_operation[&Operation::Segmentation].count, 1);
}

#[tokio::test]
async fn test_empty_document_is_rejected() {
    let engine = orchestrator(Arc::new(ScriptedModel::new(&[])), &test_config());
    let err = engine.process_document("s1", "  \n\n ", "blank.txt").await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyDocument { .. }));
}

#[tokio::test]
async fn test_attach_from_store() {
    let engine = orchestrator(Arc::new(ScriptedModel::new(&[])), &test_config());
    let store = MemoryObjectStore::new();
    store
        .put_bytes("uploads/handbook.txt", handbook().into_bytes())
        .await
        .unwrap();
    store.put_bytes("uploads/logo.png", vec![0x89, 0x50]).await.unwrap();

    let summary = engine
        .attach_from_store("s1", &store, "uploads/handbook.txt")
        .await
        .unwrap();
    assert_eq!(summary.name, "handbook.txt");
    assert_eq!(summary.sections, 6);

    let err = engine.attach_from_store("s1", &store, "uploads/logo.png").await.unwrap_err();
    assert_eq!(err.code(), "unsupported_document");

    let err = engine.attach_from_store("s1", &store, "uploads/missing.txt").await.unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
}
