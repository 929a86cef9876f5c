//! End-to-end document analysis.
//!
//! Pipeline stages:
//!   1. Chunk the text (empty / oversized input fails here)
//!   2. Extract identifiers and a regex title from the raw text
//!   3. Concurrently:
//!        a. resolve metadata through the provider chain
//!        b. analyze every chunk under the chunk pool, with retries
//!   4. Merge the surviving chunk analyses
//!   5. Optionally run deep research, streaming progress on `progress_tx`
//!
//! Chunk failures are logged and dropped. Terminal failures are an empty
//! merge and unresolved metadata.

use std::sync::Arc;
use std::time::Duration;

use perioscope_common::{ErrorKind, PerioscopeError, Result};
use perioscope_llm::LlmBackend;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::concepts::ConceptExtractor;
use crate::config::{AnalysisConfig, RetryConfig};
use crate::deep_research::{DeepResearchEngine, ResearchRequest};
use crate::identifiers::extract_identifiers;
use crate::merger::merge;
use crate::metadata::MetadataResolver;
use crate::models::{AnalysisResult, ChunkAnalysis, DocumentChunk, ResearchProgress};
use crate::pool::BoundedPool;
use crate::sources::crossref::CrossRefClient;
use crate::sources::pubmed::PubMedClient;
use crate::sources::semantic_scholar::SemanticScholarClient;
use crate::sources::LiteratureSearch;
use crate::structure::{ModelStructureExtractor, RegexStructureExtractor};
use crate::topics::{suggest_topics, TopicSuggestions};

/// Caller options, in the collaborator's camelCase shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    #[serde(default)]
    pub deep_analysis: bool,
    /// Falls back to `deep_research.default_depth`.
    pub depth: Option<usize>,
    /// Falls back to `deep_research.default_breadth`.
    pub breadth: Option<usize>,
    #[serde(default)]
    pub selected_topics: Vec<String>,
    /// Known title, used ahead of the one read off the text.
    pub title: Option<String>,
}

pub struct DocumentAnalyzer {
    chunker: Chunker,
    extractor: ConceptExtractor,
    resolver: MetadataResolver,
    research: DeepResearchEngine,
    chunk_pool: BoundedPool,
    retry: RetryConfig,
    call_timeout: Duration,
    default_depth: usize,
    default_breadth: usize,
}

impl DocumentAnalyzer {
    /// Assembles an analyzer from explicit collaborators.
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        resolver: MetadataResolver,
        search: Arc<dyn LiteratureSearch>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            chunker: Chunker::new(&config.chunking),
            extractor: ConceptExtractor::new(llm.clone()),
            resolver,
            research: DeepResearchEngine::new(llm, search, config),
            chunk_pool: BoundedPool::new(config.concurrency.chunk_analysis),
            retry: config.retry.clone(),
            call_timeout: config.timeouts.call_timeout(),
            default_depth: config.deep_research.default_depth,
            default_breadth: config.deep_research.default_breadth,
        }
    }

    /// The production wiring: PubMed, CrossRef and Semantic Scholar for
    /// metadata, PubMed for literature search, `llm` for everything else.
    pub fn from_config(llm: Arc<dyn LlmBackend>, config: &AnalysisConfig) -> Result<Self> {
        let pubmed = Arc::new(PubMedClient::new(&config.providers)?);
        let crossref = Arc::new(CrossRefClient::new(&config.providers)?);
        let semantic = Arc::new(SemanticScholarClient::new(&config.providers, &config.metadata)?);
        let model_extractor = Arc::new(ModelStructureExtractor::new(llm.clone(), config.metadata.llm_sample_chars));

        let resolver = MetadataResolver::standard(
            pubmed,
            crossref,
            semantic,
            model_extractor,
            config.timeouts.call_timeout(),
        );

        let mut search = PubMedClient::new(&config.providers)?;
        if config.deep_research.fetch_full_text {
            search = search.with_full_text(config.deep_research.max_full_text_chars);
        }

        Ok(Self::new(llm, resolver, Arc::new(search), config))
    }

    /// Topics a caller can choose from before requesting deep analysis.
    pub fn suggest_topics(&self, text: &str) -> Result<TopicSuggestions> {
        if text.trim().is_empty() {
            return Err(PerioscopeError::EmptyInput);
        }
        Ok(suggest_topics(&RegexStructureExtractor.extract_sync(text)))
    }

    #[instrument(skip_all, fields(text_len = text.len(), deep = options.deep_analysis))]
    pub async fn analyze(
        &self,
        text: &str,
        options: &AnalysisOptions,
        progress_tx: Option<broadcast::Sender<ResearchProgress>>,
    ) -> Result<AnalysisResult> {
        let run_id = Uuid::new_v4();
        let chunks = self.chunker.chunk(text)?;
        info!(run_id = %run_id, chunks = chunks.len(), "Starting document analysis");

        let identifiers = extract_identifiers(text);
        let title = options
            .title
            .clone()
            .or_else(|| RegexStructureExtractor.extract_sync(text).title);

        let (resolved, (analyses, failed)) = tokio::join!(
            self.resolver.resolve(&identifiers, title.as_deref(), text),
            self.analyze_chunks(&chunks),
        );
        let resolved = resolved?;
        info!(
            run_id = %run_id,
            presence = ?resolved.metadata.presence(),
            stages = ?resolved.contributing_stages,
            "Metadata attached"
        );

        let mut result = merge(analyses)?;
        result.chunks_failed = failed;
        result.metadata = Some(resolved.metadata);
        result.selected_topics = options.selected_topics.clone();
        info!(run_id = %run_id, analyzed = result.chunks_analyzed, failed, "Chunk analyses merged");

        if options.deep_analysis {
            let request = ResearchRequest {
                depth: options.depth.unwrap_or(self.default_depth),
                breadth: options.breadth.unwrap_or(self.default_breadth),
                selected_topics: options.selected_topics.clone(),
            };
            result.deep_analysis = self.research.research(&chunks, &request, progress_tx).await;
        }

        Ok(result)
    }

    /// Surviving analyses in chunk order, plus the number of dropped chunks.
    async fn analyze_chunks(&self, chunks: &[DocumentChunk]) -> (Vec<ChunkAnalysis>, usize) {
        let mut outcomes = self
            .chunk_pool
            .map_unordered(chunks, |chunk| async move { (chunk.index, self.analyze_with_retry(chunk).await) })
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut analyses = Vec::with_capacity(outcomes.len());
        let mut failed = 0;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(a) => analyses.push(a),
                Err(e) => {
                    warn!(chunk = index, error = %e, "Chunk analysis failed, dropping chunk");
                    failed += 1;
                }
            }
        }
        (analyses, failed)
    }

    /// Retries provider failures only; malformed output is final.
    async fn analyze_with_retry(&self, chunk: &DocumentChunk) -> Result<ChunkAnalysis> {
        let attempts = self.retry.chunk_analysis_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = tokio::time::timeout(self.call_timeout, self.extractor.analyze_chunk(chunk))
                .await
                .unwrap_or_else(|_| {
                    Err(PerioscopeError::Timeout {
                        operation: "chunk analysis".to_string(),
                        seconds: self.call_timeout.as_secs(),
                    })
                });
            match outcome {
                Err(e) if e.kind() == ErrorKind::Provider && attempt < attempts => {
                    warn!(chunk = chunk.index, attempt, error = %e, "Chunk analysis failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
