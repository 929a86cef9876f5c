//! Shared data models for document analysis.
//!
//! Field names serialize in camelCase, which is the shape the review
//! application consumes. Model-produced JSON is accepted in either camelCase
//! or snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Chunks & identifiers ──────────────────────────────────────────────────────

/// A bounded slice of document text, the unit of model analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    pub doi: Option<String>,
    pub pmid: Option<String>,
}

impl Identifiers {
    pub fn is_empty(&self) -> bool {
        self.doi.is_none() && self.pmid.is_none()
    }
}

// ── Bibliographic metadata ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub affiliation: Option<String>,
}

impl Author {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (None, Some(l)) => l.clone(),
            (Some(f), None) => f.clone(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    pub journal: Option<String>,
    pub publication_year: Option<i32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub citations: Option<u64>,
    pub impact_factor: Option<f64>,
}

impl ArticleMetadata {
    /// Fills only the fields that are still empty. Returns how many fields changed.
    ///
    /// Earlier sources always win: a populated field is never overwritten,
    /// so merging the same record twice is a no-op the second time.
    pub fn merge_from(&mut self, other: ArticleMetadata) -> usize {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) -> usize {
            if slot.is_none() && value.is_some() {
                *slot = value;
                1
            } else {
                0
            }
        }
        fn fill_vec<T>(slot: &mut Vec<T>, value: Vec<T>) -> usize {
            if slot.is_empty() && !value.is_empty() {
                *slot = value;
                1
            } else {
                0
            }
        }

        fill(&mut self.title, non_blank(other.title))
            + fill_vec(&mut self.authors, other.authors)
            + fill(&mut self.journal, non_blank(other.journal))
            + fill(&mut self.publication_year, other.publication_year)
            + fill(&mut self.abstract_text, non_blank(other.abstract_text))
            + fill_vec(&mut self.keywords, other.keywords)
            + fill(&mut self.doi, non_blank(other.doi))
            + fill(&mut self.pmid, non_blank(other.pmid))
            + fill(&mut self.citations, other.citations)
            + fill(&mut self.impact_factor, other.impact_factor)
    }

    /// Title, authors and journal are all present.
    pub fn is_complete(&self) -> bool {
        self.title.is_some() && !self.authors.is_empty() && self.journal.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == ArticleMetadata::default()
    }

    pub fn presence(&self) -> MetadataPresence {
        MetadataPresence {
            has_title: self.title.is_some(),
            has_abstract: self.abstract_text.is_some(),
            author_count: self.authors.len(),
            keyword_count: self.keywords.len(),
            has_doi: self.doi.is_some(),
            has_pmid: self.pmid.is_some(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPresence {
    pub has_title: bool,
    pub has_abstract: bool,
    pub author_count: usize,
    pub keyword_count: usize,
    pub has_doi: bool,
    pub has_pmid: bool,
}

// ── Research concepts & literature ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMethodology {
    #[serde(default, alias = "study_design")]
    pub study_design: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalEvidence {
    #[serde(default)]
    pub tests: String,
    #[serde(default)]
    pub results: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchConcept {
    #[serde(alias = "main_claim")]
    pub main_claim: String,
    #[serde(default)]
    pub methodology: ConceptMethodology,
    #[serde(default, alias = "statistical_evidence")]
    pub statistical_evidence: StatisticalEvidence,
    #[serde(default, alias = "clinical_implications")]
    pub clinical_implications: String,
}

impl ResearchConcept {
    /// Case-insensitive substring match against the claim or the implication text.
    pub fn matches_topic(&self, topic: &str) -> bool {
        let needle = topic.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.main_claim.to_lowercase().contains(&needle)
            || self.clinical_implications.to_lowercase().contains(&needle)
    }
}

/// One literature record found during a deep-research run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub full_text: Option<String>,
    pub url: String,
    pub pmc_url: Option<String>,
    pub date: String,
    pub journal: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub is_full_text_available: bool,
}

impl SearchResult {
    /// "First Author et al. Title. Journal. Year. Full text available at: URL"
    pub fn citation(&self) -> String {
        let lead = match self.authors.first() {
            Some(first) if self.authors.len() > 1 => format!("{first} et al."),
            Some(first) => format!("{first}."),
            None => "Unknown author.".to_string(),
        };
        let journal = self.journal.as_deref().unwrap_or("Unknown journal");
        let year = self.date.split_whitespace().next().unwrap_or("n.d.");
        let (label, link) = match (&self.pmc_url, self.is_full_text_available) {
            (Some(pmc), true) => ("Full text", pmc.as_str()),
            _ => ("Abstract", self.url.as_str()),
        };
        format!("{lead} {}. {journal}. {year}. {label} available at: {link}", self.title.trim_end_matches('.'))
    }
}

// ── Chunk analysis ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyAssessment {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsAssessment {
    #[serde(default)]
    pub methods: Vec<String>,
    /// Whether the statistical methods fit the study design.
    #[serde(default)]
    pub appropriateness: bool,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalRelevance {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub implications: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceLevel {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerioTags {
    #[serde(default)]
    pub relevant_conditions: Vec<String>,
    #[serde(default)]
    pub treatments: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyAnalysis {
    #[serde(default)]
    pub study_type: String,
    #[serde(default)]
    pub methodology: MethodologyAssessment,
    #[serde(default)]
    pub statistics: StatisticsAssessment,
    #[serde(default)]
    pub clinical_relevance: ClinicalRelevance,
    #[serde(default)]
    pub evidence_level: EvidenceLevel,
    #[serde(default)]
    pub perio: PerioTags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalValidation {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerioRelevance {
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub clinical_implications: Vec<String>,
    #[serde(default)]
    pub research_gaps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyQuality {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// The per-chunk structured judgment returned by the completion service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAnalysis {
    pub analysis: StudyAnalysis,
    pub statistical_validation: StatisticalValidation,
    pub perio_relevance: PerioRelevance,
    pub methodology_quality: MethodologyQuality,
}

// ── Deep research output ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedClaim {
    #[serde(default)]
    pub claim: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub validation_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedFinding {
    #[serde(default)]
    pub finding: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub relevance_score: f64,
}

/// Literature-validation report attached to an `AnalysisResult`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepAnalysis {
    pub validated_claims: Vec<ValidatedClaim>,
    pub related_findings: Vec<RelatedFinding>,
    pub clinical_implications: Vec<String>,
    pub research_gaps: Vec<String>,
    /// In `[0, 1]`.
    pub confidence_score: f64,
    pub concepts: Vec<ResearchConcept>,
    pub references: Vec<String>,
    pub queries_executed: usize,
    pub queries_failed: usize,
    pub search_result_count: usize,
}

// ── Document-level result ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub analysis: StudyAnalysis,
    pub statistical_validation: StatisticalValidation,
    pub perio_relevance: PerioRelevance,
    pub methodology_quality: MethodologyQuality,
    pub metadata: Option<ArticleMetadata>,
    pub deep_analysis: Option<DeepAnalysis>,
    #[serde(default)]
    pub selected_topics: Vec<String>,
    pub chunks_analyzed: usize,
    pub chunks_failed: usize,
    pub analyzed_at: DateTime<Utc>,
}

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStep {
    ExtractingConcepts,
    GeneratingQueries,
    Searching,
    Synthesizing,
    Complete,
    /// Terminal. Searches ran but synthesis failed, so the report is empty.
    Failed,
}

impl ResearchStep {
    pub fn label(&self) -> &'static str {
        match self {
            ResearchStep::ExtractingConcepts => "Extracting research concepts",
            ResearchStep::GeneratingQueries  => "Generating search queries",
            ResearchStep::Searching          => "Searching literature",
            ResearchStep::Synthesizing       => "Synthesizing findings",
            ResearchStep::Complete           => "Research complete",
            ResearchStep::Failed             => "Research complete (synthesis unavailable)",
        }
    }
}

/// Snapshot of a deep-research run. Counters only grow within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProgress {
    pub current_depth: usize,
    pub total_depth: usize,
    pub current_breadth: usize,
    pub total_breadth: usize,
    pub completed_queries: usize,
    pub total_queries: usize,
    pub current_step: Option<ResearchStep>,
    pub current_query: Option<String>,
}
