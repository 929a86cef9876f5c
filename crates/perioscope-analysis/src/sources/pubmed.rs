//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch:  ids for a free-text term, a DOI (`<doi>[doi]`) or a title
//!   esummary: bibliographic record for one PMID (JSON)
//!   efetch:   abstracts, journal, authors and article ids (XML);
//!             PMC full text for open-access records (JATS XML)
//!
//! Serves as provider A in the metadata chain and as the literature
//! search backend for deep research.

use async_trait::async_trait;
use perioscope_common::sandbox::SandboxClient;
use perioscope_common::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use crate::config::ProviderConfig;
use crate::models::{ArticleMetadata, Author, SearchResult};
use crate::structure::split_given_family;
use super::{status_error, BibliographicProvider, LiteratureSearch};

const PROVIDER: &str = "pubmed";
const TOOL_NAME: &str = "perioscope";

pub struct PubMedClient {
    client: SandboxClient,
    base_url: String,
    api_key: Option<SecretString>,
    email: String,
    full_text_chars: Option<usize>,
}

impl PubMedClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut client = SandboxClient::with_timeout(config.http_timeout())?;
        client.allow_url_host(&config.pubmed_base_url)?;
        Ok(Self {
            client,
            base_url: config.pubmed_base_url.trim_end_matches('/').to_string(),
            api_key: config.pubmed_api_key.clone(),
            email: config.contact_email.clone(),
            full_text_chars: None,
        })
    }

    /// Fetch PMC full text for open-access hits, truncated to `max_chars`.
    pub fn with_full_text(mut self, max_chars: usize) -> Self {
        self.full_text_chars = Some(max_chars);
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}.fcgi", self.base_url, name)
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", TOOL_NAME.to_string()), ("email", self.email.clone())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.expose_secret().to_string()));
        }
        params
    }

    async fn get(&self, endpoint: &str, params: &[(&'static str, String)]) -> Result<reqwest::Response> {
        let resp = self.client.get(&self.endpoint(endpoint))?.query(params).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(PROVIDER, resp.status()));
        }
        Ok(resp)
    }

    /// Search PubMed and return matching PMIDs.
    #[instrument(skip(self))]
    async fn esearch(&self, term: &str, max: usize) -> Result<Vec<String>> {
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("term", term.to_string()));
        params.push(("retmax", max.to_string()));
        params.push(("retmode", "json".to_string()));

        let body: serde_json::Value = self.get("esearch", &params).await?.json().await?;

        let ids: Vec<String> = body["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        debug!(?ids, "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn esummary(&self, pmid: &str) -> Result<Option<ArticleMetadata>> {
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmid.to_string()));
        params.push(("retmode", "json".to_string()));

        let body: serde_json::Value = self.get("esummary", &params).await?.json().await?;
        Ok(summary_to_metadata(pmid, &body["result"][pmid]))
    }

    async fn summary_for_first_hit(&self, term: &str) -> Result<Option<ArticleMetadata>> {
        match self.esearch(term, 1).await?.first() {
            Some(pmid) => self.esummary(pmid).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn efetch_records(&self, pmids: &[String]) -> Result<Vec<PubMedRecord>> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = self.get("efetch", &params).await?.text().await?;
        Ok(parse_pubmed_xml(&xml))
    }

    #[instrument(skip(self))]
    async fn fetch_pmc_text(&self, pmcid: &str, max_chars: usize) -> Result<Option<String>> {
        let mut params = self.base_params();
        params.push(("db", "pmc".to_string()));
        params.push(("id", pmcid.trim_start_matches("PMC").to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = self.get("efetch", &params).await?.text().await?;
        if xml.trim().is_empty() || xml.contains("<error>") {
            return Ok(None);
        }
        Ok(pmc_body_text(&xml, max_chars))
    }
}

#[async_trait]
impl BibliographicProvider for PubMedClient {
    fn name(&self) -> &'static str { PROVIDER }

    async fn lookup_pmid(&self, pmid: &str) -> Result<Option<ArticleMetadata>> {
        self.esummary(pmid).await
    }

    async fn lookup_doi(&self, doi: &str) -> Result<Option<ArticleMetadata>> {
        self.summary_for_first_hit(&format!("{doi}[doi]")).await
    }

    async fn lookup_title(&self, title: &str) -> Result<Option<ArticleMetadata>> {
        self.summary_for_first_hit(&title.replace('"', "")).await
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let pmids = self.esearch(query, max_results).await?;
        let records = self.efetch_records(&pmids).await?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let full_text = match (&record.pmcid, self.full_text_chars) {
                (Some(pmcid), Some(max_chars)) => match self.fetch_pmc_text(pmcid, max_chars).await {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(pmcid = %pmcid, error = %e, "PMC full text unavailable, keeping abstract");
                        None
                    }
                },
                _ => None,
            };
            results.push(record.into_search_result(full_text));
        }
        Ok(results)
    }
}

// ── esummary conversion ───────────────────────────────────────────────────────

fn summary_to_metadata(pmid: &str, doc: &serde_json::Value) -> Option<ArticleMetadata> {
    if doc.is_null() || doc.get("error").is_some() {
        return None;
    }
    let title = doc["title"].as_str().map(str::trim).filter(|t| !t.is_empty())?;

    let authors = doc["authors"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| a["name"].as_str())
                .map(parse_pubmed_author)
                .collect()
        })
        .unwrap_or_default();

    let journal = doc["fulljournalname"]
        .as_str()
        .or_else(|| doc["source"].as_str())
        .filter(|j| !j.is_empty())
        .map(String::from);

    let publication_year = doc["pubdate"]
        .as_str()
        .and_then(|d| d.split_whitespace().next())
        .and_then(|y| y.parse::<i32>().ok());

    let doi = doc["articleids"]
        .as_array()
        .and_then(|ids| ids.iter().find(|id| id["idtype"] == "doi"))
        .and_then(|id| id["value"].as_str())
        .map(String::from);

    Some(ArticleMetadata {
        title: Some(title.trim_end_matches('.').to_string()),
        authors,
        journal,
        publication_year,
        doi,
        pmid: Some(pmid.to_string()),
        ..Default::default()
    })
}

/// "Lang NP" → last "Lang", first "NP"; falls back to given-family order.
fn parse_pubmed_author(name: &str) -> Author {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((initials, family))
            if !family.is_empty()
                && initials.len() <= 3
                && initials.chars().all(|c| c.is_ascii_uppercase()) =>
        {
            Author {
                first_name: Some(initials.to_string()),
                last_name: Some(family.join(" ")),
                affiliation: None,
            }
        }
        _ => split_given_family(name),
    }
}

// ── efetch XML ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
struct PubMedRecord {
    pmid: Option<String>,
    pmcid: Option<String>,
    doi: Option<String>,
    title: String,
    abstract_text: String,
    journal: Option<String>,
    authors: Vec<String>,
    year: Option<String>,
    month: Option<String>,
    medline_date: Option<String>,
}

impl PubMedRecord {
    fn into_search_result(self, full_text: Option<String>) -> SearchResult {
        let date = match (&self.year, &self.month, &self.medline_date) {
            (Some(y), Some(m), _) => format!("{y} {m}"),
            (Some(y), None, _) => y.clone(),
            (None, _, Some(d)) => d.clone(),
            _ => String::new(),
        };
        let url = self
            .pmid
            .as_ref()
            .map(|id| format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"))
            .unwrap_or_default();
        let pmc_url = self
            .pmcid
            .as_ref()
            .map(|id| format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{id}/"));

        SearchResult {
            title: self.title,
            abstract_text: self.abstract_text,
            is_full_text_available: self.pmcid.is_some(),
            full_text,
            url,
            pmc_url,
            date,
            journal: self.journal,
            authors: self.authors,
        }
    }
}

fn id_type_of(e: &BytesStart) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| matches!(a.key.as_ref(), b"IdType" | b"EIdType"))
        .map(|a| String::from_utf8_lossy(&a.value).to_lowercase())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse efetch `<PubmedArticleSet>` XML into records.
///
/// Citations of other papers (`ReferenceList`, `CommentsCorrectionsList`)
/// carry their own PMIDs and ids and are skipped.
fn parse_pubmed_xml(xml: &str) -> Vec<PubMedRecord> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut current: Option<PubMedRecord> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut id_type: Option<String> = None;
    let mut last_name = String::new();
    let mut initials = String::new();
    let mut collective = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                match e.name().as_ref() {
                    b"PubmedArticle" => current = Some(PubMedRecord::default()),
                    b"Author" => {
                        last_name.clear();
                        initials.clear();
                        collective.clear();
                    }
                    b"ArticleId" | b"ELocationID" => id_type = id_type_of(e),
                    b"AbstractText" => {
                        if let Some(ref mut r) = current {
                            r.abstract_text.push(' ');
                        }
                    }
                    _ => {}
                }
                path.push(e.name().as_ref().to_vec());
            }
            Ok(Event::Text(ref e)) => {
                let within = |tag: &[u8]| path.iter().any(|p| p.as_slice() == tag);
                let in_citations = within(b"ReferenceList") || within(b"CommentsCorrectionsList");
                if let (Some(r), false) = (&mut current, in_citations) {
                    let text = e.unescape().unwrap_or_default();
                    let parent = path.last().map(Vec::as_slice).unwrap_or_default();

                    if within(b"ArticleTitle") {
                        r.title.push_str(&text);
                    } else if within(b"AbstractText") {
                        r.abstract_text.push_str(&text);
                    } else {
                        let value = text.trim();
                        match parent {
                            b"PMID" if r.pmid.is_none() => r.pmid = Some(value.to_string()),
                            b"Title" if within(b"Journal") => r.journal = Some(value.to_string()),
                            b"LastName" => last_name = value.to_string(),
                            b"Initials" => initials = value.to_string(),
                            b"CollectiveName" => collective = value.to_string(),
                            b"Year" if within(b"PubDate") => r.year = Some(value.to_string()),
                            b"Month" if within(b"PubDate") => r.month = Some(value.to_string()),
                            b"MedlineDate" => r.medline_date = Some(value.to_string()),
                            b"ArticleId" | b"ELocationID" => match id_type.as_deref() {
                                Some("doi") if r.doi.is_none() => r.doi = Some(value.to_string()),
                                Some("pmc") if r.pmcid.is_none() => r.pmcid = Some(value.to_string()),
                                _ => {}
                            },
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                path.pop();
                match e.name().as_ref() {
                    b"Author" => {
                        if let Some(ref mut r) = current {
                            let name = if collective.is_empty() {
                                format!("{last_name} {initials}").trim().to_string()
                            } else {
                                collective.clone()
                            };
                            if !name.is_empty() {
                                r.authors.push(name);
                            }
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(mut r) = current.take() {
                            r.title = collapse(&r.title);
                            r.abstract_text = collapse(&r.abstract_text);
                            if r.title.is_empty() {
                                warn!(pmid = ?r.pmid, "Skipping PubMed record with empty title");
                            } else {
                                records.push(r);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("PubMed XML parse error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    records
}

/// Plain text of the `<body>` of a PMC JATS article.
fn pmc_body_text(xml: &str, max_chars: usize) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut body_depth = 0usize;
    let mut out = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"body" => body_depth += 1,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"body" => {
                body_depth = body_depth.saturating_sub(1);
            }
            Ok(Event::Text(ref e)) if body_depth > 0 => {
                out.push_str(&e.unescape().unwrap_or_default());
                out.push(' ');
                // Whitespace collapsing below only shrinks the text.
                if out.len() > max_chars * 4 {
                    break;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let text: String = collapse(&out).chars().take(max_chars).collect();
    if text.is_empty() { None } else { Some(text) }
}
