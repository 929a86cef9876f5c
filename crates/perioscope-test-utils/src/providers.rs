//! In-memory bibliographic provider and literature search.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use perioscope_analysis::models::{ArticleMetadata, SearchResult};
use perioscope_analysis::sources::{BibliographicProvider, LiteratureSearch};
use perioscope_common::{PerioscopeError, Result};

// ── Bibliographic provider ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockBibliographicProvider {
    name: &'static str,
    by_pmid: HashMap<String, ArticleMetadata>,
    by_doi: HashMap<String, ArticleMetadata>,
    by_title: HashMap<String, ArticleMetadata>,
    failing: bool,
    pmid_calls: AtomicUsize,
    doi_calls: AtomicUsize,
    title_calls: AtomicUsize,
}

impl MockBibliographicProvider {
    pub fn new(name: &'static str) -> Self {
        Self { name, ..Default::default() }
    }

    pub fn with_pmid(mut self, pmid: &str, meta: ArticleMetadata) -> Self {
        self.by_pmid.insert(pmid.to_string(), meta);
        self
    }

    pub fn with_doi(mut self, doi: &str, meta: ArticleMetadata) -> Self {
        self.by_doi.insert(doi.to_string(), meta);
        self
    }

    /// Title matching is case-insensitive.
    pub fn with_title(mut self, title: &str, meta: ArticleMetadata) -> Self {
        self.by_title.insert(title.to_lowercase(), meta);
        self
    }

    /// Every lookup fails with a provider error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn pmid_calls(&self) -> usize { self.pmid_calls.load(Ordering::SeqCst) }
    pub fn doi_calls(&self) -> usize { self.doi_calls.load(Ordering::SeqCst) }
    pub fn title_calls(&self) -> usize { self.title_calls.load(Ordering::SeqCst) }

    pub fn total_calls(&self) -> usize {
        self.pmid_calls() + self.doi_calls() + self.title_calls()
    }

    fn answer(&self, map: &HashMap<String, ArticleMetadata>, key: &str) -> Result<Option<ArticleMetadata>> {
        if self.failing {
            return Err(PerioscopeError::provider(self.name, "HTTP 503"));
        }
        Ok(map.get(key).cloned())
    }
}

#[async_trait]
impl BibliographicProvider for MockBibliographicProvider {
    fn name(&self) -> &'static str { self.name }

    async fn lookup_pmid(&self, pmid: &str) -> Result<Option<ArticleMetadata>> {
        self.pmid_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.by_pmid, pmid)
    }

    async fn lookup_doi(&self, doi: &str) -> Result<Option<ArticleMetadata>> {
        self.doi_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.by_doi, doi)
    }

    async fn lookup_title(&self, title: &str) -> Result<Option<ArticleMetadata>> {
        self.title_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.by_title, &title.to_lowercase())
    }
}

// ── Literature search ─────────────────────────────────────────────────────────

/// Search fake that records how many queries overlap in time.
#[derive(Debug, Default)]
pub struct MockLiteratureSearch {
    per_query: usize,
    fixed: HashMap<String, Vec<SearchResult>>,
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockLiteratureSearch {
    /// Every query returns `per_query` synthetic results unique to that query.
    pub fn new(per_query: usize) -> Self {
        Self { per_query, ..Default::default() }
    }

    pub fn with_results(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.fixed.insert(query.to_string(), results);
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn synthetic(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        (1..=self.per_query.min(max_results))
            .map(|i| SearchResult {
                title: format!("{query}: study {i}"),
                abstract_text: format!("Findings on {query}."),
                url: format!("https://pubmed.ncbi.nlm.nih.gov/{slug}-{i}/"),
                date: "2023".to_string(),
                journal: Some("J Periodontol".to_string()),
                authors: vec!["Lang NP".to_string()],
                ..Default::default()
            })
            .collect()
    }
}

#[async_trait]
impl LiteratureSearch for MockLiteratureSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(query) {
            return Err(PerioscopeError::provider("mock_search", "HTTP 429"));
        }
        Ok(match self.fixed.get(query) {
            Some(results) => results.iter().take(max_results).cloned().collect(),
            None => self.synthetic(query, max_results),
        })
    }
}
