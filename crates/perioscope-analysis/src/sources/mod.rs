//! External bibliographic and literature clients.
//!
//! `BibliographicProvider` is the keyed-lookup side used by the metadata
//! resolver; `LiteratureSearch` is the free-text side used by deep research.

pub mod crossref;
pub mod pubmed;
pub mod semantic_scholar;

use async_trait::async_trait;
use perioscope_common::{PerioscopeError, Result};

use crate::models::{ArticleMetadata, SearchResult};

/// Keyed lookup against one bibliographic provider.
///
/// A provider only overrides the lookups it supports; the rest report
/// "nothing found". `Ok(None)` means the provider answered without a match.
#[async_trait]
pub trait BibliographicProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup_pmid(&self, _pmid: &str) -> Result<Option<ArticleMetadata>> {
        Ok(None)
    }

    async fn lookup_doi(&self, _doi: &str) -> Result<Option<ArticleMetadata>> {
        Ok(None)
    }

    async fn lookup_title(&self, _title: &str) -> Result<Option<ArticleMetadata>> {
        Ok(None)
    }
}

/// Free-text literature search returning ranked records.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Maps a non-success HTTP status to a provider error.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode) -> PerioscopeError {
    PerioscopeError::provider(provider, format!("HTTP {}", status.as_u16()))
}
