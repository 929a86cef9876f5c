//! Injected configuration for the analysis pipeline.
//!
//! Every component takes its section at construction; nothing here is global.
//! All fields have serde defaults so a partial `[analysis]` table is valid.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub deep_research: DeepResearchConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
}

// ── Chunking ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

fn default_max_chunk_chars() -> usize { 25_000 }
fn default_max_input_bytes() -> usize { 5_000_000 }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

// ── Concurrency ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// In-flight chunk analysis / concept extraction calls.
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_analysis: usize,
    /// In-flight literature search queries.
    #[serde(default = "default_search_concurrency")]
    pub literature_search: usize,
}

fn default_chunk_concurrency()  -> usize { 4 }
fn default_search_concurrency() -> usize { 3 }

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            chunk_analysis: default_chunk_concurrency(),
            literature_search: default_search_concurrency(),
        }
    }
}

// ── Timeouts & retries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_run_timeout")]
    pub research_run_timeout_secs: u64,
}

fn default_call_timeout() -> u64 { 90 }
fn default_run_timeout()  -> u64 { 900 }

impl TimeoutConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn research_run_timeout(&self) -> Duration {
        Duration::from_secs(self.research_run_timeout_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            research_run_timeout_secs: default_run_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per chunk analysis; only provider failures are retried.
    #[serde(default = "default_chunk_attempts")]
    pub chunk_analysis_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_chunk_attempts() -> u32 { 2 }
fn default_backoff_ms()     -> u64 { 500 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            chunk_analysis_attempts: default_chunk_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ── Deep research ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DeepResearchConfig {
    #[serde(default = "default_depth")]
    pub default_depth: usize,
    #[serde(default = "default_breadth")]
    pub default_breadth: usize,
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    #[serde(default = "default_true")]
    pub fetch_full_text: bool,
    #[serde(default = "default_max_full_text_chars")]
    pub max_full_text_chars: usize,
    #[serde(default = "default_max_results_in_synthesis")]
    pub max_results_in_synthesis: usize,
    /// Used for a concept whose query generation fails.
    #[serde(default = "default_fallback_queries")]
    pub fallback_queries: Vec<String>,
}

fn default_depth()                    -> usize { 2 }
fn default_breadth()                  -> usize { 3 }
fn default_results_per_query()        -> usize { 5 }
fn default_true()                     -> bool  { true }
fn default_max_full_text_chars()      -> usize { 20_000 }
fn default_max_results_in_synthesis() -> usize { 40 }

fn default_fallback_queries() -> Vec<String> {
    vec![
        "dental implants primary stability clinical evidence".to_string(),
        "periodontal treatment outcomes systematic review".to_string(),
        "bone density implant stability correlation".to_string(),
    ]
}

impl Default for DeepResearchConfig {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            default_breadth: default_breadth(),
            results_per_query: default_results_per_query(),
            fetch_full_text: default_true(),
            max_full_text_chars: default_max_full_text_chars(),
            max_results_in_synthesis: default_max_results_in_synthesis(),
            fallback_queries: default_fallback_queries(),
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Minimum normalized title similarity for a similarity-matched record.
    #[serde(default = "default_title_similarity")]
    pub title_similarity_threshold: f64,
    /// Leading characters of the document sent to the model extractor.
    #[serde(default = "default_llm_sample_chars")]
    pub llm_sample_chars: usize,
    #[serde(default = "default_title_candidates")]
    pub title_candidates: usize,
}

fn default_title_similarity() -> f64   { 0.85 }
fn default_llm_sample_chars() -> usize { 4_000 }
fn default_title_candidates() -> usize { 5 }

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            title_similarity_threshold: default_title_similarity(),
            llm_sample_chars: default_llm_sample_chars(),
            title_candidates: default_title_candidates(),
        }
    }
}

// ── Providers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_eutils_url")]
    pub pubmed_base_url: String,
    #[serde(default)]
    pub pubmed_api_key: Option<SecretString>,
    #[serde(default = "default_crossref_url")]
    pub crossref_base_url: String,
    #[serde(default = "default_semantic_scholar_url")]
    pub semantic_scholar_base_url: String,
    #[serde(default)]
    pub semantic_scholar_api_key: Option<SecretString>,
    /// Sent to CrossRef for its polite pool and to NCBI as `email`.
    #[serde(default = "default_contact_email")]
    pub contact_email: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_eutils_url()           -> String { "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string() }
fn default_crossref_url()         -> String { "https://api.crossref.org".to_string() }
fn default_semantic_scholar_url() -> String { "https://api.semanticscholar.org/graph/v1".to_string() }
fn default_contact_email()        -> String { "support@periospot.com".to_string() }
fn default_http_timeout()         -> u64    { 30 }

impl ProviderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            pubmed_base_url: default_eutils_url(),
            pubmed_api_key: None,
            crossref_base_url: default_crossref_url(),
            semantic_scholar_base_url: default_semantic_scholar_url(),
            semantic_scholar_api_key: None,
            contact_email: default_contact_email(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.chunking.max_chunk_chars, 25_000);
        assert_eq!(cfg.chunking.max_input_bytes, 5_000_000);
        assert_eq!(cfg.concurrency.literature_search, 3);
        assert_eq!(cfg.deep_research.default_depth, 2);
        assert_eq!(cfg.deep_research.default_breadth, 3);
        assert_eq!(cfg.deep_research.fallback_queries.len(), 3);
        assert_eq!(cfg.timeouts.call_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let cfg: AnalysisConfig = serde_json::from_value(serde_json::json!({
            "concurrency": { "literature_search": 5 },
            "providers": { "pubmed_api_key": "abc" }
        }))
        .unwrap();
        assert_eq!(cfg.concurrency.literature_search, 5);
        assert_eq!(cfg.concurrency.chunk_analysis, 4);
        assert!(cfg.providers.pubmed_api_key.is_some());
        assert_eq!(cfg.providers.crossref_base_url, "https://api.crossref.org");
    }
}
