//! Deep research engine: query accounting, fallbacks, pool bound, degradation.
//!
//! Run with: cargo test --package perioscope-analysis --test test_deep_research

use std::sync::Arc;
use std::time::Duration;

use perioscope_analysis::models::{ResearchConcept, ResearchProgress, ResearchStep};
use perioscope_analysis::prompts;
use perioscope_analysis::{AnalysisConfig, DeepResearchEngine, ProgressStatus, ResearchRequest};
use perioscope_test_utils::pretty_assertions::assert_eq;
use perioscope_test_utils::{synthesis_json, MockLiteratureSearch, MockLlmBackend};
use serde_json::json;
use tokio::sync::broadcast;

fn concept(claim: &str) -> ResearchConcept {
    ResearchConcept {
        main_claim: claim.to_string(),
        methodology: Default::default(),
        statistical_evidence: Default::default(),
        clinical_implications: String::new(),
    }
}

fn three_concepts() -> Vec<ResearchConcept> {
    vec![
        concept("Undersized drilling increases implant stability in soft bone"),
        concept("Non-surgical therapy reduces probing depth"),
        concept("Smoking doubles the risk of peri-implantitis"),
    ]
}

fn config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.timeouts.call_timeout_secs = 5;
    config
}

fn drain(mut rx: broadcast::Receiver<ResearchProgress>) -> Vec<ResearchProgress> {
    let mut out = Vec::new();
    while let Ok(p) = rx.try_recv() {
        out.push(p);
    }
    out
}

fn scripted_llm() -> MockLlmBackend {
    MockLlmBackend::new()
        .on(prompts::QUERY_GENERATION, json!({"queries": ["query one", "query two", "query three", "query four"]}))
        .on(prompts::SYNTHESIS, synthesis_json(0.6))
}

#[tokio::test]
async fn test_total_queries_uses_filtered_concept_count() {
    let search = Arc::new(MockLiteratureSearch::new(1));
    let engine = DeepResearchEngine::new(Arc::new(scripted_llm()), search.clone(), &config());
    let request = ResearchRequest { depth: 2, breadth: 3, selected_topics: vec!["implant stability".to_string()] };
    let (tx, rx) = broadcast::channel(1_024);

    let deep = engine.validate(three_concepts(), &request, Some(tx)).await.unwrap();

    assert_eq!(deep.concepts.len(), 1);
    assert_eq!(deep.queries_executed, 6);
    assert_eq!(search.queries().len(), 6);

    let snapshots = drain(rx);
    let started: Vec<_> = snapshots.iter().filter(|p| p.total_queries > 0).collect();
    assert!(started.iter().all(|p| p.total_queries == 6));
    assert_eq!(snapshots.last().map(|p| p.completed_queries), Some(6));
    assert_eq!(snapshots.iter().map(|p| p.current_depth).max(), Some(2));
}

#[tokio::test]
async fn test_search_pool_bounds_in_flight_queries() {
    let search = Arc::new(MockLiteratureSearch::new(1).with_delay(Duration::from_millis(20)));
    let engine = DeepResearchEngine::new(Arc::new(scripted_llm()), search.clone(), &config());
    let request = ResearchRequest { depth: 1, breadth: 4, selected_topics: vec![] };

    let deep = engine.validate(three_concepts(), &request, None).await.unwrap();

    assert_eq!(deep.queries_executed, 12);
    assert!(search.peak_in_flight() <= 3, "peak was {}", search.peak_in_flight());
    assert!(search.peak_in_flight() >= 1);
}

#[tokio::test]
async fn test_failed_searches_still_count_as_completed() {
    let search = Arc::new(MockLiteratureSearch::new(2).failing_on("query two"));
    let engine = DeepResearchEngine::new(Arc::new(scripted_llm()), search, &config());
    let request = ResearchRequest { depth: 1, breadth: 2, selected_topics: vec![] };
    let (tx, rx) = broadcast::channel(1_024);

    let deep = engine.validate(vec![concept("Claim A")], &request, Some(tx)).await.unwrap();

    assert_eq!(deep.queries_executed, 2);
    assert_eq!(deep.queries_failed, 1);
    assert_eq!(deep.search_result_count, 2);
    let last = drain(rx).pop().unwrap();
    assert_eq!(last.completed_queries, last.total_queries);
}

#[tokio::test]
async fn test_query_generation_failure_falls_back_for_that_concept_only() {
    let llm = MockLlmBackend::new()
        .fail_content(prompts::QUERY_GENERATION, "Smoking")
        .on(prompts::QUERY_GENERATION, json!({"queries": ["specific query"]}))
        .on(prompts::SYNTHESIS, synthesis_json(0.5));
    let search = Arc::new(MockLiteratureSearch::new(1));
    let engine = DeepResearchEngine::new(Arc::new(llm), search.clone(), &config());
    let request = ResearchRequest { depth: 1, breadth: 1, selected_topics: vec![] };

    let concepts = vec![
        concept("Non-surgical therapy reduces probing depth"),
        concept("Smoking doubles the risk of peri-implantitis"),
    ];
    let deep = engine.validate(concepts, &request, None).await.unwrap();

    let mut queries = search.queries();
    queries.sort();
    let fallback = config().deep_research.fallback_queries[0].clone();
    assert_eq!(queries, vec![fallback, "specific query".to_string()]);
    assert_eq!(deep.queries_executed, 2);
}

#[tokio::test]
async fn test_synthesis_failure_degrades_to_empty_report() {
    let llm = MockLlmBackend::new()
        .on(prompts::QUERY_GENERATION, json!({"queries": ["query one"]}))
        .on_raw(prompts::SYNTHESIS, "I could not produce JSON this time.");
    let engine = DeepResearchEngine::new(Arc::new(llm), Arc::new(MockLiteratureSearch::new(3)), &config());
    let request = ResearchRequest { depth: 1, breadth: 1, selected_topics: vec![] };
    let (tx, rx) = broadcast::channel(1_024);

    let deep = engine.validate(vec![concept("Claim A")], &request, Some(tx)).await.unwrap();

    assert!(deep.validated_claims.is_empty());
    assert!(deep.related_findings.is_empty());
    assert!(deep.clinical_implications.is_empty());
    assert!(deep.research_gaps.is_empty());
    assert_eq!(deep.confidence_score, 0.0);
    assert_eq!(deep.concepts.len(), 1);
    assert_eq!(deep.references.len(), 3);
    let last = drain(rx).pop().unwrap();
    assert_eq!(last.current_step, Some(ResearchStep::Failed));
    let status = ProgressStatus::from(&last);
    assert!(status.finished);
    assert_eq!(status.label, "Research complete (synthesis unavailable)");
}

#[tokio::test]
async fn test_no_matching_concepts_skips_research() {
    let llm = Arc::new(scripted_llm());
    let engine = DeepResearchEngine::new(llm.clone(), Arc::new(MockLiteratureSearch::new(1)), &config());
    let request = ResearchRequest { depth: 2, breadth: 2, selected_topics: vec!["orthodontics".to_string()] };

    assert!(engine.validate(three_concepts(), &request, None).await.is_none());
    assert_eq!(llm.calls(prompts::QUERY_GENERATION), 0);
    assert_eq!(llm.calls(prompts::SYNTHESIS), 0);
}

#[tokio::test]
async fn test_run_deadline_drops_outstanding_queries() {
    let mut config = config();
    config.timeouts.research_run_timeout_secs = 1;
    let search = Arc::new(MockLiteratureSearch::new(1).with_delay(Duration::from_millis(1_500)));
    let llm = Arc::new(scripted_llm());
    let engine = DeepResearchEngine::new(llm.clone(), search, &config);
    let request = ResearchRequest { depth: 2, breadth: 1, selected_topics: vec![] };

    let deep = engine.validate(vec![concept("Claim A")], &request, None).await.unwrap();

    assert_eq!(deep.queries_executed, 0);
    assert_eq!(deep.search_result_count, 0);
    // The second round never starts; synthesis still runs.
    assert_eq!(llm.calls(prompts::QUERY_GENERATION), 1);
    assert_eq!(llm.calls(prompts::SYNTHESIS), 1);
}
