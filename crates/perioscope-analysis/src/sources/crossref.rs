//! CrossRef works client (metadata provider B).
//!
//! API: {base}/works/{doi} and {base}/works?query.bibliographic=…&rows=1
//! Polite pool: the User-Agent carries a mailto (see CrossRef etiquette).

use async_trait::async_trait;
use perioscope_common::sandbox::SandboxClient;
use perioscope_common::Result;
use tracing::{debug, instrument};

use crate::config::ProviderConfig;
use crate::models::{ArticleMetadata, Author};
use crate::structure::strip_markup;
use super::{status_error, BibliographicProvider};

const PROVIDER: &str = "crossref";

pub struct CrossRefClient {
    client: SandboxClient,
    base_url: String,
    user_agent: String,
}

impl CrossRefClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut client = SandboxClient::with_timeout(config.http_timeout())?;
        client.allow_url_host(&config.crossref_base_url)?;
        Ok(Self {
            client,
            base_url: config.crossref_base_url.trim_end_matches('/').to_string(),
            user_agent: format!(
                "Perioscope/{} (mailto:{})",
                env!("CARGO_PKG_VERSION"),
                config.contact_email
            ),
        })
    }

    #[instrument(skip(self))]
    async fn resolve_doi(&self, doi: &str) -> Result<Option<ArticleMetadata>> {
        let url = format!("{}/works/{}", self.base_url, doi);
        let resp = self.client
            .get(&url)?
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(work_to_metadata(&body["message"]))
    }

    #[instrument(skip(self))]
    async fn search_title(&self, title: &str) -> Result<Option<ArticleMetadata>> {
        let url = format!("{}/works", self.base_url);
        let resp = self.client
            .get(&url)?
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[("query.bibliographic", title), ("rows", "1")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        let items = body["message"]["items"].as_array();
        debug!(n = items.map_or(0, Vec::len), "CrossRef title search results");
        Ok(items.and_then(|i| i.first()).and_then(work_to_metadata))
    }
}

#[async_trait]
impl BibliographicProvider for CrossRefClient {
    fn name(&self) -> &'static str { PROVIDER }

    async fn lookup_doi(&self, doi: &str) -> Result<Option<ArticleMetadata>> {
        self.resolve_doi(doi).await
    }

    async fn lookup_title(&self, title: &str) -> Result<Option<ArticleMetadata>> {
        self.search_title(title).await
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn first_string(value: &serde_json::Value) -> Option<String> {
    value
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn work_to_metadata(work: &serde_json::Value) -> Option<ArticleMetadata> {
    let title = first_string(&work["title"])?;

    let authors = work["author"]
        .as_array()
        .map(|list| {
            list.iter()
                .map(|a| Author {
                    first_name: a["given"].as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                    last_name: a["family"]
                        .as_str()
                        .or_else(|| a["name"].as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                    affiliation: a["affiliation"]
                        .as_array()
                        .and_then(|af| af.first())
                        .and_then(|af| af["name"].as_str())
                        .map(String::from),
                })
                .filter(|a| a.last_name.is_some() || a.first_name.is_some())
                .collect()
        })
        .unwrap_or_default();

    // JATS markup in abstracts is flattened to plain text.
    let abstract_text = work["abstract"]
        .as_str()
        .map(|a| strip_markup(a).split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|a| !a.is_empty());

    let publication_year = ["published", "published-print", "published-online", "issued"]
        .iter()
        .find_map(|key| work[*key]["date-parts"][0][0].as_i64())
        .map(|y| y as i32);

    let keywords = work["subject"]
        .as_array()
        .map(|s| s.iter().filter_map(|v| v.as_str()).map(String::from).collect())
        .unwrap_or_default();

    Some(ArticleMetadata {
        title: Some(title),
        authors,
        journal: first_string(&work["container-title"]),
        publication_year,
        abstract_text,
        keywords,
        doi: work["DOI"].as_str().map(String::from),
        citations: work["is-referenced-by-count"].as_u64(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_to_metadata() {
        let work = serde_json::json!({
            "DOI": "10.1111/jcpe.13290",
            "title": ["Treatment of stage I–III periodontitis"],
            "author": [
                {"given": "David", "family": "Herrera", "affiliation": [{"name": "Complutense University"}]},
                {"name": "EFP Workshop Participants"}
            ],
            "container-title": ["Journal of Clinical Periodontology"],
            "published-print": {"date-parts": [[2020, 7]]},
            "abstract": "<jats:p>Background: the <jats:italic>S3</jats:italic> guideline.</jats:p>",
            "is-referenced-by-count": 812,
            "subject": ["Periodontics"]
        });
        let meta = work_to_metadata(&work).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Treatment of stage I–III periodontitis"));
        assert_eq!(meta.authors.len(), 2);
        assert_eq!(meta.authors[0].affiliation.as_deref(), Some("Complutense University"));
        assert_eq!(meta.authors[1].last_name.as_deref(), Some("EFP Workshop Participants"));
        assert_eq!(meta.journal.as_deref(), Some("Journal of Clinical Periodontology"));
        assert_eq!(meta.publication_year, Some(2020));
        assert_eq!(meta.abstract_text.as_deref(), Some("Background: the S3 guideline."));
        assert_eq!(meta.citations, Some(812));
        assert_eq!(meta.keywords, vec!["Periodontics"]);
    }

    #[test]
    fn test_work_without_title_is_none() {
        assert!(work_to_metadata(&serde_json::json!({"DOI": "10.1/x", "title": []})).is_none());
    }
}
