//! End-to-end document analysis with a scripted model and in-memory providers.
//!
//! Run with: cargo test --package perioscope-analysis --test test_pipeline

use std::sync::Arc;

use perioscope_analysis::models::ResearchStep;
use perioscope_analysis::prompts;
use perioscope_analysis::structure::{ModelStructureExtractor, RegexStructureExtractor};
use perioscope_analysis::{AnalysisConfig, AnalysisOptions, DocumentAnalyzer, MetadataResolver};
use perioscope_common::{ErrorKind, PerioscopeError};
use perioscope_test_utils::pretty_assertions::assert_eq;
use perioscope_test_utils::{
    chunk_analysis_json, complete_metadata, concepts_json, synthesis_json, MockBibliographicProvider,
    MockLiteratureSearch, MockLlmBackend, SAMPLE_ARTICLE,
};
use serde_json::json;
use tokio::sync::broadcast;

const TWO_CHUNKS: &str = "ALPHA section. Tapered implants reached higher ISQ in soft bone.\n\n\
                          BETA section. PMID: 123456. Insertion torque correlated with ISQ.";

fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.chunking.max_chunk_chars = 80;
    config.retry.backoff_ms = 0;
    config.timeouts.call_timeout_secs = 5;
    config
}

fn analyzer(llm: Arc<MockLlmBackend>, config: &AnalysisConfig) -> DocumentAnalyzer {
    let pubmed = Arc::new(MockBibliographicProvider::new("pubmed").with_pmid("123456", complete_metadata("Tapered implants in soft bone")));
    let resolver = MetadataResolver::standard(
        pubmed,
        Arc::new(MockBibliographicProvider::new("crossref")),
        Arc::new(MockBibliographicProvider::new("semantic_scholar")),
        Arc::new(RegexStructureExtractor),
        config.timeouts.call_timeout(),
    );
    DocumentAnalyzer::new(llm, resolver, Arc::new(MockLiteratureSearch::new(2)), config)
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped_and_merge_proceeds() {
    let llm = Arc::new(
        MockLlmBackend::new()
            .on_content(prompts::CHUNK_ANALYSIS, "ALPHA", chunk_analysis_json(80.0, true))
            .on_content(prompts::CHUNK_ANALYSIS, "BETA", json!({"analysis": {}})),
    );
    let config = test_config();
    let result = analyzer(llm.clone(), &config)
        .analyze(TWO_CHUNKS, &AnalysisOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(result.chunks_analyzed, 1);
    assert_eq!(result.chunks_failed, 1);
    assert_eq!(result.methodology_quality.score, 80.0);
    assert_eq!(result.analysis.study_type, "Randomized controlled trial");
    assert_eq!(
        result.metadata.as_ref().and_then(|m| m.title.as_deref()),
        Some("Tapered implants in soft bone")
    );
    assert!(result.deep_analysis.is_none());
    // Malformed output is never retried.
    assert_eq!(llm.calls(prompts::CHUNK_ANALYSIS), 2);
    assert_eq!(llm.calls(prompts::CONCEPT_EXTRACTION), 0);
}

#[tokio::test]
async fn test_provider_failure_is_retried() {
    let llm = Arc::new(
        MockLlmBackend::new()
            .fail_times(prompts::CHUNK_ANALYSIS, 1)
            .on(prompts::CHUNK_ANALYSIS, chunk_analysis_json(60.0, false)),
    );
    let config = test_config();
    let result = analyzer(llm.clone(), &config)
        .analyze("PMID: 123456. A single short paragraph.", &AnalysisOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(result.chunks_analyzed, 1);
    assert_eq!(result.chunks_failed, 0);
    assert!(!result.statistical_validation.is_valid);
    assert_eq!(llm.calls(prompts::CHUNK_ANALYSIS), 2);
}

#[tokio::test]
async fn test_validity_is_anded_across_chunks() {
    let llm = Arc::new(
        MockLlmBackend::new()
            .on_content(prompts::CHUNK_ANALYSIS, "ALPHA", chunk_analysis_json(70.0, true))
            .on_content(prompts::CHUNK_ANALYSIS, "BETA", chunk_analysis_json(75.0, false)),
    );
    let config = test_config();
    let result = analyzer(llm, &config)
        .analyze(TWO_CHUNKS, &AnalysisOptions::default(), None)
        .await
        .unwrap();

    assert!(!result.statistical_validation.is_valid);
    assert!(!result.analysis.statistics.appropriateness);
    assert_eq!(result.perio_relevance.relevance_score, 73.0);
}

#[tokio::test]
async fn test_title_line_survives_when_providers_miss() {
    let text = "Title: Platform switching and crestal bone loss\n\nAbstract\nBone loss was lower.";
    let llm = Arc::new(
        MockLlmBackend::new()
            .on(prompts::CHUNK_ANALYSIS, chunk_analysis_json(70.0, true))
            .on(prompts::METADATA_EXTRACTION, json!({"abstract": "Bone loss was lower."})),
    );
    let config = test_config();
    let resolver = MetadataResolver::standard(
        Arc::new(MockBibliographicProvider::new("pubmed")),
        Arc::new(MockBibliographicProvider::new("crossref")),
        Arc::new(MockBibliographicProvider::new("semantic_scholar")),
        Arc::new(ModelStructureExtractor::new(llm.clone(), 4_000)),
        config.timeouts.call_timeout(),
    );
    let result = DocumentAnalyzer::new(llm, resolver, Arc::new(MockLiteratureSearch::new(2)), &config)
        .analyze(text, &AnalysisOptions::default(), None)
        .await
        .unwrap();

    let metadata = result.metadata.unwrap();
    assert_eq!(metadata.title.as_deref(), Some("Platform switching and crestal bone loss"));
    assert_eq!(metadata.abstract_text.as_deref(), Some("Bone loss was lower."));
}

#[tokio::test]
async fn test_all_chunks_failing_is_terminal() {
    let llm = Arc::new(MockLlmBackend::new().fail(prompts::CHUNK_ANALYSIS));
    let config = test_config();
    let err = analyzer(llm, &config)
        .analyze(TWO_CHUNKS, &AnalysisOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PerioscopeError::NoValidResults));
    assert_eq!(err.kind(), ErrorKind::Merge);
}

#[tokio::test]
async fn test_blank_text_is_rejected() {
    let config = test_config();
    let err = analyzer(Arc::new(MockLlmBackend::new()), &config)
        .analyze(" \n\n ", &AnalysisOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[tokio::test]
async fn test_deep_analysis_attaches_report_and_streams_progress() {
    let llm = Arc::new(
        MockLlmBackend::new()
            .on(prompts::CHUNK_ANALYSIS, chunk_analysis_json(80.0, true))
            .on(
                prompts::CONCEPT_EXTRACTION,
                concepts_json(&["Tapered implants improve primary stability", "Insertion torque predicts ISQ"]),
            )
            .on(prompts::QUERY_GENERATION, json!({"queries": ["tapered implant ISQ", "insertion torque ISQ"]}))
            .on(prompts::SYNTHESIS, synthesis_json(85.0)),
    );
    let config = test_config();
    let options = AnalysisOptions { deep_analysis: true, depth: Some(1), breadth: Some(2), ..Default::default() };
    let (tx, mut rx) = broadcast::channel(1_024);

    let result = analyzer(llm, &config).analyze(TWO_CHUNKS, &options, Some(tx)).await.unwrap();
    let deep = result.deep_analysis.expect("deep analysis requested");

    // Both chunks report the same two claims.
    assert_eq!(deep.concepts.len(), 2);
    assert_eq!(deep.queries_executed, 4);
    assert_eq!(deep.queries_failed, 0);
    assert_eq!(deep.search_result_count, 4);
    assert_eq!(deep.references.len(), 4);
    assert!((deep.confidence_score - 0.85).abs() < 1e-9);
    assert_eq!(deep.validated_claims.len(), 1);

    let mut snapshots = Vec::new();
    while let Ok(p) = rx.try_recv() {
        snapshots.push(p);
    }
    let last = snapshots.last().expect("progress was published");
    assert_eq!(last.current_step, Some(ResearchStep::Complete));
    assert_eq!(last.completed_queries, 4);
    assert_eq!(last.total_queries, 4);
    let completed: Vec<_> = snapshots.iter().map(|p| p.completed_queries).collect();
    assert!(completed.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_suggest_topics_from_sample_article() {
    let config = test_config();
    let suggestions = analyzer(Arc::new(MockLlmBackend::new()), &config)
        .suggest_topics(SAMPLE_ARTICLE)
        .unwrap();
    let titles: Vec<_> = suggestions.topics.iter().map(|t| t.title.as_str()).collect();
    assert!(titles.contains(&"dental implants"));
    assert!(titles.contains(&"primary stability of tapered implants in type IV bone"));
    assert!(suggestions.summary.starts_with("This randomized trial evaluated"));
}
