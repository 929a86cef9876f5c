//! Per-chunk model calls: research concept extraction and chunk analysis.
//!
//! Neither call retries; retry policy belongs to the pipeline.

use std::sync::Arc;

use perioscope_common::{PerioscopeError, Result};
use perioscope_llm::{complete_json, LlmBackend, StructuredPrompt};
use tracing::{debug, instrument};

use crate::models::{ChunkAnalysis, DocumentChunk, ResearchConcept};
use crate::prompts;

const CONCEPT_TEMPERATURE: f32 = 0.2;
const ANALYSIS_TEMPERATURE: f32 = 0.3;

pub struct ConceptExtractor {
    llm: Arc<dyn LlmBackend>,
}

impl ConceptExtractor {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }

    /// Research concepts asserted in one chunk.
    ///
    /// Entries without a usable `main_claim` are skipped; a reply without a
    /// `concepts` array is malformed.
    #[instrument(skip(self, chunk), fields(chunk = chunk.index))]
    pub async fn extract_concepts(&self, chunk: &DocumentChunk) -> Result<Vec<ResearchConcept>> {
        let prompt = StructuredPrompt {
            instructions: prompts::CONCEPT_EXTRACTION,
            required_keys: prompts::CONCEPT_EXTRACTION_KEYS,
            temperature: CONCEPT_TEMPERATURE,
            max_tokens: Some(2_048),
        };
        let value = complete_json(self.llm.as_ref(), prompt, &chunk.text).await?;
        let Some(entries) = value["concepts"].as_array() else {
            return Err(PerioscopeError::MalformedModelOutput("\"concepts\" is not an array".to_string()));
        };

        let concepts: Vec<ResearchConcept> = entries
            .iter()
            .filter_map(|entry| match serde_json::from_value::<ResearchConcept>(entry.clone()) {
                Ok(c) if !c.main_claim.trim().is_empty() => Some(c),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable concept");
                    None
                }
            })
            .collect();
        debug!(returned = entries.len(), kept = concepts.len(), "Concepts extracted");
        Ok(concepts)
    }

    /// Structured methodological judgment of one chunk.
    #[instrument(skip(self, chunk), fields(chunk = chunk.index, chars = chunk.text.len()))]
    pub async fn analyze_chunk(&self, chunk: &DocumentChunk) -> Result<ChunkAnalysis> {
        let prompt = StructuredPrompt {
            instructions: prompts::CHUNK_ANALYSIS,
            required_keys: prompts::CHUNK_ANALYSIS_KEYS,
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: Some(4_096),
        };
        let value = complete_json(self.llm.as_ref(), prompt, &chunk.text).await?;
        serde_json::from_value(value)
            .map_err(|e| PerioscopeError::MalformedModelOutput(format!("chunk analysis shape: {e}")))
    }
}
