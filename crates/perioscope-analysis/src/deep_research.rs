//! Deep research: literature validation of a document's research concepts.
//!
//! Steps of one run:
//!   1. ExtractingConcepts  concepts per chunk, deduplicated, topic-filtered
//!   2. GeneratingQueries   `breadth` queries per concept for the current round
//!   3. Searching           queries under the search pool, each with a deadline
//!   4. Synthesizing        one completion over concepts + collected results
//!   5. Complete | Failed
//!
//! Steps 2–3 repeat once per depth round; later rounds see the titles already
//! found. `total_queries = depth × breadth × concepts` is fixed at the start.
//! Failed generation falls back to configured generic queries for that
//! concept only. Failed searches count as completed with no results.
//! Synthesis failure yields an empty report with confidence 0.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use perioscope_common::{PerioscopeError, Result};
use perioscope_llm::{complete_json, LlmBackend, StructuredPrompt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::concepts::ConceptExtractor;
use crate::config::{AnalysisConfig, DeepResearchConfig};
use crate::merger::dedupe_concepts;
use crate::models::{
    DeepAnalysis, DocumentChunk, RelatedFinding, ResearchConcept, ResearchProgress, ResearchStep,
    SearchResult, ValidatedClaim,
};
use crate::pool::BoundedPool;
use crate::prompts;
use crate::sources::LiteratureSearch;

const RESEARCH_TEMPERATURE: f32 = 0.2;
const KNOWN_TITLES_IN_PROMPT: usize = 10;
const FULL_TEXT_EXCERPT_CHARS: usize = 2_000;

/// Parameters of one run.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub depth: usize,
    pub breadth: usize,
    /// Case-insensitive substrings; empty keeps every concept.
    pub selected_topics: Vec<String>,
}

pub struct DeepResearchEngine {
    llm: Arc<dyn LlmBackend>,
    search: Arc<dyn LiteratureSearch>,
    extractor: ConceptExtractor,
    llm_pool: BoundedPool,
    search_pool: BoundedPool,
    config: DeepResearchConfig,
    call_timeout: Duration,
    run_timeout: Duration,
}

impl DeepResearchEngine {
    pub fn new(llm: Arc<dyn LlmBackend>, search: Arc<dyn LiteratureSearch>, config: &AnalysisConfig) -> Self {
        Self {
            extractor: ConceptExtractor::new(llm.clone()),
            llm,
            search,
            llm_pool: BoundedPool::new(config.concurrency.chunk_analysis),
            search_pool: BoundedPool::new(config.concurrency.literature_search),
            config: config.deep_research.clone(),
            call_timeout: config.timeouts.call_timeout(),
            run_timeout: config.timeouts.research_run_timeout(),
        }
    }

    /// Extracts concepts from `chunks` and validates them.
    ///
    /// Returns `None` when no concept survives extraction and topic filtering.
    #[instrument(skip_all, fields(chunks = chunks.len(), depth = request.depth, breadth = request.breadth))]
    pub async fn research(
        &self,
        chunks: &[DocumentChunk],
        request: &ResearchRequest,
        progress_tx: Option<broadcast::Sender<ResearchProgress>>,
    ) -> Option<DeepAnalysis> {
        let mut progress = ProgressTracker::new(progress_tx, request);
        progress.step(ResearchStep::ExtractingConcepts);

        let concepts = self.extract_all(chunks).await;
        self.run_with(concepts, request, progress).await
    }

    /// Validates already-extracted concepts.
    pub async fn validate(
        &self,
        concepts: Vec<ResearchConcept>,
        request: &ResearchRequest,
        progress_tx: Option<broadcast::Sender<ResearchProgress>>,
    ) -> Option<DeepAnalysis> {
        let progress = ProgressTracker::new(progress_tx, request);
        self.run_with(dedupe_concepts(concepts), request, progress).await
    }

    async fn run_with(
        &self,
        concepts: Vec<ResearchConcept>,
        request: &ResearchRequest,
        mut progress: ProgressTracker,
    ) -> Option<DeepAnalysis> {
        let run_id = Uuid::new_v4();
        let concepts = filter_by_topics(concepts, &request.selected_topics);
        if concepts.is_empty() {
            info!(run_id = %run_id, "No research concepts to validate, skipping deep research");
            progress.step(ResearchStep::Complete);
            return None;
        }

        progress.start(concepts.len());
        info!(
            run_id = %run_id,
            concepts = concepts.len(),
            total_queries = progress.state.total_queries,
            "Starting deep research"
        );

        let outcome = self.search_rounds(&concepts, request, &mut progress).await;
        let results = prepare_results(outcome.results, self.config.max_results_in_synthesis);

        progress.step(ResearchStep::Synthesizing);
        let synthesis = match self.synthesize(&concepts, &results).await {
            Ok(s) => {
                progress.step(ResearchStep::Complete);
                s
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Synthesis failed, returning empty report");
                progress.step(ResearchStep::Failed);
                Synthesis::default()
            }
        };

        info!(
            run_id = %run_id,
            executed = outcome.executed,
            failed = outcome.failed,
            results = results.len(),
            confidence = synthesis.confidence_score,
            "Deep research finished"
        );

        Some(DeepAnalysis {
            validated_claims: synthesis.validated_claims,
            related_findings: synthesis.related_findings,
            clinical_implications: synthesis.clinical_implications,
            research_gaps: synthesis.research_gaps,
            confidence_score: normalize_confidence(synthesis.confidence_score),
            references: results.iter().map(SearchResult::citation).collect(),
            concepts,
            queries_executed: outcome.executed,
            queries_failed: outcome.failed,
            search_result_count: results.len(),
        })
    }

    // ── Concept extraction ────────────────────────────────────────────────────

    async fn extract_all(&self, chunks: &[DocumentChunk]) -> Vec<ResearchConcept> {
        let mut per_chunk = self
            .llm_pool
            .map_unordered(chunks, |chunk| async move {
                let outcome = tokio::time::timeout(self.call_timeout, self.extractor.extract_concepts(chunk)).await;
                (chunk.index, outcome)
            })
            .await;
        per_chunk.sort_by_key(|(index, _)| *index);

        let mut concepts = Vec::new();
        for (index, outcome) in per_chunk {
            match outcome {
                Ok(Ok(found)) => concepts.extend(found),
                Ok(Err(e)) => warn!(chunk = index, error = %e, "Concept extraction failed for chunk"),
                Err(_) => warn!(chunk = index, "Concept extraction timed out for chunk"),
            }
        }
        let concepts = dedupe_concepts(concepts);
        debug!(concepts = concepts.len(), "Concepts extracted across chunks");
        concepts
    }

    // ── Query generation & search ─────────────────────────────────────────────

    async fn search_rounds(
        &self,
        concepts: &[ResearchConcept],
        request: &ResearchRequest,
        progress: &mut ProgressTracker,
    ) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        let deadline = tokio::time::Instant::now() + self.run_timeout;

        for round in 1..=request.depth {
            progress.state.current_depth = round;
            progress.step(ResearchStep::GeneratingQueries);

            let known_titles: Vec<&str> = outcome
                .results
                .iter()
                .map(|r| r.title.as_str())
                .take(KNOWN_TITLES_IN_PROMPT)
                .collect();
            let planned = self.plan_round(concepts, request.breadth, &known_titles).await;

            progress.step(ResearchStep::Searching);
            let finished = self.run_queries(&planned, deadline, progress, &mut outcome).await;
            if !finished {
                warn!(
                    round,
                    timeout_secs = self.run_timeout.as_secs(),
                    "Research deadline reached, synthesizing collected results"
                );
                break;
            }
        }
        outcome
    }

    /// Queries for every concept in one round, in concept order.
    async fn plan_round(&self, concepts: &[ResearchConcept], breadth: usize, known_titles: &[&str]) -> Vec<PlannedQuery> {
        let mut per_concept = self
            .llm_pool
            .map_unordered(concepts.iter().enumerate(), |(i, concept)| async move {
                let generated = tokio::time::timeout(
                    self.call_timeout,
                    self.generate_queries(concept, breadth, known_titles),
                )
                .await
                .unwrap_or_else(|_| Err(PerioscopeError::Timeout {
                    operation: "query generation".to_string(),
                    seconds: self.call_timeout.as_secs(),
                }));
                let queries = match generated {
                    Ok(q) if !q.is_empty() => q,
                    Ok(_) => {
                        warn!(concept = i, "No queries generated, using fallback queries");
                        self.fallback_queries(breadth)
                    }
                    Err(e) => {
                        warn!(concept = i, error = %e, "Query generation failed, using fallback queries");
                        self.fallback_queries(breadth)
                    }
                };
                (i, queries)
            })
            .await;
        per_concept.sort_by_key(|(i, _)| *i);

        per_concept
            .into_iter()
            .flat_map(|(concept, queries)| {
                queries
                    .into_iter()
                    .enumerate()
                    .map(move |(slot, text)| PlannedQuery { concept, slot: slot + 1, text })
            })
            .collect()
    }

    #[instrument(skip(self, concept, known_titles), fields(claim = %concept.main_claim))]
    async fn generate_queries(
        &self,
        concept: &ResearchConcept,
        breadth: usize,
        known_titles: &[&str],
    ) -> Result<Vec<String>> {
        let prompt = StructuredPrompt {
            instructions: prompts::QUERY_GENERATION,
            required_keys: prompts::QUERY_GENERATION_KEYS,
            temperature: RESEARCH_TEMPERATURE,
            max_tokens: Some(512),
        };
        let content = json!({
            "concept": concept,
            "numberOfQueries": breadth,
            "alreadyFoundTitles": known_titles,
        })
        .to_string();
        let value = complete_json(self.llm.as_ref(), prompt, &content).await?;
        let Some(list) = value["queries"].as_array() else {
            return Err(PerioscopeError::MalformedModelOutput("\"queries\" is not an array".to_string()));
        };
        Ok(list
            .iter()
            .filter_map(|q| q.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .take(breadth)
            .collect())
    }

    fn fallback_queries(&self, breadth: usize) -> Vec<String> {
        self.config.fallback_queries.iter().take(breadth).cloned().collect()
    }

    /// Runs `planned` under the search pool. Returns false when the deadline
    /// cut the round short; unfinished queries are dropped.
    async fn run_queries(
        &self,
        planned: &[PlannedQuery],
        deadline: tokio::time::Instant,
        progress: &mut ProgressTracker,
        outcome: &mut SearchOutcome,
    ) -> bool {
        let per_query = self.config.results_per_query;
        let mut pending: FuturesUnordered<_> = planned
            .iter()
            .map(|query| async move {
                let result = self
                    .search_pool
                    .run(async { tokio::time::timeout(self.call_timeout, self.search.search(&query.text, per_query)).await })
                    .await;
                (query, result)
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((query, result))) => {
                    match result {
                        Ok(Ok(found)) => {
                            debug!(query = %query.text, n = found.len(), "Search returned");
                            outcome.results.extend(found);
                        }
                        Ok(Err(e)) => {
                            warn!(query = %query.text, error = %e, "Search failed, treating as empty");
                            outcome.failed += 1;
                        }
                        Err(_) => {
                            warn!(query = %query.text, "Search timed out, treating as empty");
                            outcome.failed += 1;
                        }
                    }
                    outcome.executed += 1;
                    progress.query_completed(query);
                }
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    // ── Synthesis ─────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(concepts = concepts.len(), results = results.len()))]
    async fn synthesize(&self, concepts: &[ResearchConcept], results: &[SearchResult]) -> Result<Synthesis> {
        let prompt = StructuredPrompt {
            instructions: prompts::SYNTHESIS,
            required_keys: prompts::SYNTHESIS_KEYS,
            temperature: RESEARCH_TEMPERATURE,
            max_tokens: Some(4_096),
        };
        let literature: Vec<_> = results
            .iter()
            .map(|r| {
                json!({
                    "title": r.title,
                    "journal": r.journal,
                    "date": r.date,
                    "abstract": r.abstract_text,
                    "fullTextExcerpt": r.full_text.as_deref().map(|t| excerpt(t, FULL_TEXT_EXCERPT_CHARS)),
                    "url": r.url,
                })
            })
            .collect();
        let content = json!({ "concepts": concepts, "literature": literature }).to_string();

        let value = tokio::time::timeout(self.call_timeout, complete_json(self.llm.as_ref(), prompt, &content))
            .await
            .map_err(|_| PerioscopeError::Timeout {
                operation: "synthesis".to_string(),
                seconds: self.call_timeout.as_secs(),
            })??;
        serde_json::from_value(value)
            .map_err(|e| PerioscopeError::MalformedModelOutput(format!("synthesis shape: {e}")))
    }
}

// ── Run state ─────────────────────────────────────────────────────────────────

struct PlannedQuery {
    concept: usize,
    slot: usize,
    text: String,
}

#[derive(Default)]
struct SearchOutcome {
    results: Vec<SearchResult>,
    executed: usize,
    failed: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Synthesis {
    #[serde(default)]
    validated_claims: Vec<ValidatedClaim>,
    #[serde(default)]
    related_findings: Vec<RelatedFinding>,
    #[serde(default)]
    clinical_implications: Vec<String>,
    #[serde(default)]
    research_gaps: Vec<String>,
    #[serde(default)]
    confidence_score: f64,
}

/// Owns the run's `ResearchProgress` and publishes a snapshot on every change.
struct ProgressTracker {
    state: ResearchProgress,
    tx: Option<broadcast::Sender<ResearchProgress>>,
}

impl ProgressTracker {
    fn new(tx: Option<broadcast::Sender<ResearchProgress>>, request: &ResearchRequest) -> Self {
        let state = ResearchProgress {
            total_depth: request.depth,
            total_breadth: request.breadth,
            ..Default::default()
        };
        Self { state, tx }
    }

    fn start(&mut self, concepts: usize) {
        self.state.total_queries = self.state.total_depth * self.state.total_breadth * concepts;
    }

    fn step(&mut self, step: ResearchStep) {
        self.state.current_step = Some(step);
        self.publish();
    }

    fn query_completed(&mut self, query: &PlannedQuery) {
        self.state.completed_queries += 1;
        self.state.current_breadth = query.slot;
        self.state.current_query = Some(query.text.clone());
        debug!(
            concept = query.concept,
            completed = self.state.completed_queries,
            total = self.state.total_queries,
            "Query resolved"
        );
        self.publish();
    }

    fn publish(&self) {
        if let Some(tx) = &self.tx {
            // No receivers is fine; lagging receivers drop old snapshots.
            let _ = tx.send(self.state.clone());
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn filter_by_topics(concepts: Vec<ResearchConcept>, topics: &[String]) -> Vec<ResearchConcept> {
    let topics: Vec<&str> = topics.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    if topics.is_empty() {
        return concepts;
    }
    let before = concepts.len();
    let kept: Vec<_> = concepts
        .into_iter()
        .filter(|c| topics.iter().any(|t| c.matches_topic(t)))
        .collect();
    debug!(before, after = kept.len(), "Concepts filtered by selected topics");
    kept
}

/// Dedupes by URL (by title when the URL is empty) and caps the list.
fn prepare_results(results: Vec<SearchResult>, cap: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| {
            let key = if r.url.is_empty() { r.title.to_lowercase() } else { r.url.clone() };
            seen.insert(key)
        })
        .take(cap)
        .collect()
}

/// Scores above 1 are percentages. Result lies in `[0, 1]`.
fn normalize_confidence(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    let score = if score > 1.0 { score / 100.0 } else { score };
    score.clamp(0.0, 1.0)
}

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(claim: &str, implication: &str) -> ResearchConcept {
        ResearchConcept {
            main_claim: claim.to_string(),
            methodology: Default::default(),
            statistical_evidence: Default::default(),
            clinical_implications: implication.to_string(),
        }
    }

    #[test]
    fn test_topic_filter_matches_claim_or_implication() {
        let concepts = vec![
            concept("Implant stability improves with undersized drilling", ""),
            concept("Scaling reduces pocket depth", "Supports non-surgical therapy"),
            concept("Orthodontic relapse is common", ""),
        ];
        let kept = filter_by_topics(concepts.clone(), &["implant stability".to_string()]);
        assert_eq!(kept.len(), 1);
        let kept = filter_by_topics(concepts.clone(), &["NON-SURGICAL".to_string(), "relapse".to_string()]);
        assert_eq!(kept.len(), 2);
        assert_eq!(filter_by_topics(concepts, &[" ".to_string()]).len(), 3);
    }

    #[test]
    fn test_confidence_normalization() {
        assert_eq!(normalize_confidence(0.7), 0.7);
        assert_eq!(normalize_confidence(85.0), 0.85);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-0.2), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_prepare_results_dedupes_and_caps() {
        let r = |url: &str, title: &str| SearchResult { url: url.into(), title: title.into(), ..Default::default() };
        let out = prepare_results(
            vec![r("u1", "A"), r("u1", "A again"), r("", "B"), r("", "b"), r("u2", "C"), r("u3", "D")],
            3,
        );
        let titles: Vec<_> = out.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_progress_total_is_fixed_product() {
        let request = ResearchRequest { depth: 2, breadth: 3, selected_topics: vec![] };
        let mut tracker = ProgressTracker::new(None, &request);
        tracker.start(4);
        assert_eq!(tracker.state.total_queries, 24);
        tracker.query_completed(&PlannedQuery { concept: 0, slot: 2, text: "q".into() });
        assert_eq!(tracker.state.completed_queries, 1);
        assert_eq!(tracker.state.total_queries, 24);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("périodontite", 3), "pér");
        assert_eq!(excerpt("short", 10), "short");
    }
}
