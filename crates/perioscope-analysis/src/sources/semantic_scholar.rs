//! Semantic Scholar Graph API client (metadata provider C).
//!
//! API: {base}/paper/search?query=…&fields=…
//! Title lookups accept the best candidate only when its normalized title
//! similarity reaches the configured threshold.

use async_trait::async_trait;
use perioscope_common::sandbox::SandboxClient;
use perioscope_common::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use crate::config::{MetadataConfig, ProviderConfig};
use crate::models::ArticleMetadata;
use crate::structure::split_given_family;
use super::{status_error, BibliographicProvider};

const PROVIDER: &str = "semantic_scholar";
const FIELDS: &str =
    "title,authors,year,journal,venue,abstract,citationCount,influentialCitationCount,externalIds";

pub struct SemanticScholarClient {
    client: SandboxClient,
    base_url: String,
    api_key: Option<SecretString>,
    candidates: usize,
    threshold: f64,
}

impl SemanticScholarClient {
    pub fn new(providers: &ProviderConfig, metadata: &MetadataConfig) -> Result<Self> {
        let mut client = SandboxClient::with_timeout(providers.http_timeout())?;
        client.allow_url_host(&providers.semantic_scholar_base_url)?;
        Ok(Self {
            client,
            base_url: providers.semantic_scholar_base_url.trim_end_matches('/').to_string(),
            api_key: providers.semantic_scholar_api_key.clone(),
            candidates: metadata.title_candidates.max(1),
            threshold: metadata.title_similarity_threshold,
        })
    }

    #[instrument(skip(self))]
    async fn search_papers(&self, query: &str) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/paper/search", self.base_url);
        let limit = self.candidates.to_string();
        let mut req = self.client
            .get(&url)?
            .query(&[("query", query), ("fields", FIELDS), ("limit", limit.as_str())]);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key.expose_secret());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body["data"].as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BibliographicProvider for SemanticScholarClient {
    fn name(&self) -> &'static str { PROVIDER }

    async fn lookup_title(&self, title: &str) -> Result<Option<ArticleMetadata>> {
        let papers = self.search_papers(title).await?;
        let best = best_match(title, &papers);
        match best {
            Some((paper, score)) if score >= self.threshold => {
                debug!(score, "Semantic Scholar title match accepted");
                Ok(paper_to_metadata(paper))
            }
            Some((_, score)) => {
                debug!(score, threshold = self.threshold, "Semantic Scholar best match below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

// ── Similarity ────────────────────────────────────────────────────────────────

fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein similarity of two titles, ignoring case and punctuation.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}

fn best_match<'a>(title: &str, papers: &'a [serde_json::Value]) -> Option<(&'a serde_json::Value, f64)> {
    papers
        .iter()
        .filter_map(|p| p["title"].as_str().map(|t| (p, title_similarity(title, t))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

// ── Conversion ────────────────────────────────────────────────────────────────

fn paper_to_metadata(paper: &serde_json::Value) -> Option<ArticleMetadata> {
    let title = paper["title"].as_str().map(str::trim).filter(|t| !t.is_empty())?;

    let authors = paper["authors"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| a["name"].as_str())
                .map(split_given_family)
                .collect()
        })
        .unwrap_or_default();

    let journal = paper["journal"]["name"]
        .as_str()
        .or_else(|| paper["venue"].as_str())
        .filter(|j| !j.is_empty())
        .map(String::from);

    Some(ArticleMetadata {
        title: Some(title.to_string()),
        authors,
        journal,
        publication_year: paper["year"].as_i64().map(|y| y as i32),
        abstract_text: paper["abstract"].as_str().map(String::from),
        doi: paper["externalIds"]["DOI"].as_str().map(String::from),
        pmid: paper["externalIds"]["PubMed"].as_str().map(String::from),
        citations: paper["citationCount"].as_u64(),
        impact_factor: paper["influentialCitationCount"].as_f64(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_ignores_case_and_punctuation() {
        let s = title_similarity(
            "Peri-implant diseases: a consensus report.",
            "peri implant diseases - a consensus report",
        );
        assert!((s - 1.0).abs() < f64::EPSILON);
        assert!(title_similarity("Implant survival", "Orthodontic retention") < 0.5);
    }

    #[test]
    fn test_best_match_picks_closest_title() {
        let papers = vec![
            serde_json::json!({"title": "Orthodontic retention protocols"}),
            serde_json::json!({"title": "Implant survival in smokers: a cohort study"}),
            serde_json::json!({"paperId": "no-title"}),
        ];
        let (paper, score) = best_match("Implant survival in smokers", &papers).unwrap();
        assert_eq!(paper["title"], "Implant survival in smokers: a cohort study");
        assert!(score > 0.6 && score < 1.0);
        assert!(best_match("anything", &[]).is_none());
    }

    #[test]
    fn test_paper_to_metadata() {
        let paper = serde_json::json!({
            "title": "Implant survival in smokers",
            "authors": [{"name": "Ana Silva"}],
            "year": 2022,
            "journal": {"name": "Clinical Oral Investigations"},
            "citationCount": 14,
            "influentialCitationCount": 2,
            "externalIds": {"DOI": "10.1007/s00784-022-0001", "PubMed": "35000000"}
        });
        let meta = paper_to_metadata(&paper).unwrap();
        assert_eq!(meta.authors[0].last_name.as_deref(), Some("Silva"));
        assert_eq!(meta.journal.as_deref(), Some("Clinical Oral Investigations"));
        assert_eq!(meta.impact_factor, Some(2.0));
        assert_eq!(meta.pmid.as_deref(), Some("35000000"));
        assert!(meta.is_complete());
    }
}
