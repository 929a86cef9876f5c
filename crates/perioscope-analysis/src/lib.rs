//! perioscope-analysis: Scientific document analysis and claim validation.
//! - Paragraph-respecting chunking
//! - DOI / PMID extraction and text structure extraction
//! - Metadata resolution over PubMed, CrossRef and Semantic Scholar
//! - Per-chunk concept extraction and analysis, merged per document
//! - Deep research: literature search, synthesis, progress reporting

pub mod chunker;
pub mod concepts;
pub mod config;
pub mod deep_research;
pub mod identifiers;
pub mod merger;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod prompts;
pub mod sources;
pub mod structure;
pub mod topics;

pub use config::AnalysisConfig;
pub use deep_research::{DeepResearchEngine, ResearchRequest};
pub use metadata::{LookupKey, MetadataResolver, ResolvedMetadata};
pub use models::{AnalysisResult, ArticleMetadata, ResearchProgress};
pub use pipeline::{AnalysisOptions, DocumentAnalyzer};
pub use progress::ProgressStatus;
