//! Title / abstract / author / keyword recovery from raw article text.
//!
//! Two interchangeable strategies implement `TextStructureExtractor`:
//!   RegexStructureExtractor    heading heuristics, no network
//!   ModelStructureExtractor    completion-service extraction over the first page

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use perioscope_common::Result;
use perioscope_llm::{complete_json, LlmBackend, StructuredPrompt};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::identifiers::extract_identifiers;
use crate::models::{ArticleMetadata, Author, Identifiers};
use crate::prompts;

const TITLE_WINDOW: usize = 1_000;
const AUTHOR_WINDOW: usize = 2_000;
const MAX_ABSTRACT_CHARS: usize = 5_000;

/// What a strategy could read off the document itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentStructure {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Vec<Author>,
    pub keywords: Vec<String>,
    pub identifiers: Identifiers,
}

impl DocumentStructure {
    pub fn into_metadata(self) -> ArticleMetadata {
        ArticleMetadata {
            title: self.title,
            authors: self.authors,
            abstract_text: self.abstract_text,
            keywords: self.keywords,
            doi: self.identifiers.doi,
            pmid: self.identifiers.pmid,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait TextStructureExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, text: &str) -> Result<DocumentStructure>;
}

// ── Regex strategy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStructureExtractor;

impl RegexStructureExtractor {
    pub fn extract_sync(&self, text: &str) -> DocumentStructure {
        DocumentStructure {
            title: extract_title(text),
            abstract_text: extract_abstract(text),
            authors: extract_authors(text),
            keywords: extract_keywords(text),
            identifiers: extract_identifiers(text),
        }
    }
}

#[async_trait]
impl TextStructureExtractor for RegexStructureExtractor {
    fn name(&self) -> &'static str { "regex" }

    async fn extract(&self, text: &str) -> Result<DocumentStructure> {
        Ok(self.extract_sync(text))
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn title_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?im)^\s*title\s*:\s*(.+)$")
}

fn section_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)^(?:abstract|introduction|background)\b")
}

fn abstract_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?im)^\s*(?:abstract|summary)\b[\s:.\-]*")
}

fn abstract_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?i)\n\s*(?:introduction|background|methods?|materials and methods|results|discussion|conclusions?|keywords?|key words)\b",
    )
}

fn keywords_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?im)^\s*(?:keywords?|key words)\s*[:\-]?\s*(.+)$")
}

fn authors_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?im)^\s*(?:authors?\s*:|by[:\s])\s*(.+)$")
}

fn author_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\s*(?:[,;&]|\band\b)\s*")
}

fn markup() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<[^>]*>")
}

fn window(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Title:` line, else the line right above an Abstract/Introduction/Background
/// heading, else the first line of plausible title length.
pub fn extract_title(text: &str) -> Option<String> {
    let head = window(text, TITLE_WINDOW);

    if let Some(c) = title_line().captures(head) {
        let title = c[1].trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }

    let lines: Vec<&str> = head.lines().map(str::trim).collect();
    if let Some(pos) = lines.iter().position(|l| section_heading().is_match(l)) {
        if let Some(prev) = lines[..pos].iter().rev().find(|l| !l.is_empty()) {
            return Some(prev.to_string());
        }
    }

    lines
        .iter()
        .find(|l| (20..=150).contains(&l.chars().count()))
        .map(|l| l.to_string())
}

/// Text between an Abstract/Summary heading and the next section heading.
pub fn extract_abstract(text: &str) -> Option<String> {
    let start = abstract_start().find(text)?;
    let rest = &text[start.end()..];
    let body = match abstract_end().find(rest) {
        Some(end) => &rest[..end.start()],
        None => rest.split("\n\n").next().unwrap_or(rest),
    };
    let cleaned = collapse_whitespace(&strip_markup(body));
    if cleaned.is_empty() {
        None
    } else {
        Some(window(&cleaned, MAX_ABSTRACT_CHARS).to_string())
    }
}

pub fn extract_keywords(text: &str) -> Vec<String> {
    let Some(c) = keywords_line().captures(text) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    c[1].split([',', ';'])
        .map(|k| k.trim().trim_end_matches('.').trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(String::from)
        .collect()
}

pub fn extract_authors(text: &str) -> Vec<Author> {
    let head = window(text, AUTHOR_WINDOW);
    let Some(c) = authors_line().captures(head) else {
        return Vec::new();
    };
    author_separator()
        .split(&c[1])
        .map(|n| n.trim_matches(|ch: char| ch.is_ascii_digit() || matches!(ch, '*' | '†' | '‡' | ' ')))
        .filter(|n| !n.is_empty())
        .map(split_given_family)
        .collect()
}

/// "Jane A. Smith" → first "Jane A.", last "Smith".
pub fn split_given_family(name: &str) -> Author {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, [])) => Author { last_name: Some(last.to_string()), ..Default::default() },
        Some((last, given)) => Author {
            first_name: Some(given.join(" ")),
            last_name: Some(last.to_string()),
            affiliation: None,
        },
        None => Author::default(),
    }
}

pub fn strip_markup(text: &str) -> String {
    markup().replace_all(text, " ").into_owned()
}

// ── Model strategy ────────────────────────────────────────────────────────────

/// Asks the completion service to read bibliographic fields off the first page.
pub struct ModelStructureExtractor {
    llm: Arc<dyn LlmBackend>,
    sample_chars: usize,
}

impl ModelStructureExtractor {
    pub fn new(llm: Arc<dyn LlmBackend>, sample_chars: usize) -> Self {
        Self { llm, sample_chars }
    }
}

#[async_trait]
impl TextStructureExtractor for ModelStructureExtractor {
    fn name(&self) -> &'static str { "model" }

    #[instrument(skip(self, text), fields(sample_chars = self.sample_chars))]
    async fn extract(&self, text: &str) -> Result<DocumentStructure> {
        let prompt = StructuredPrompt {
            instructions: prompts::METADATA_EXTRACTION,
            required_keys: &[],
            temperature: 0.0,
            max_tokens: Some(2_048),
        };
        let value = complete_json(self.llm.as_ref(), prompt, window(text, self.sample_chars)).await?;
        let structure = structure_from_value(&value);
        debug!(has_title = structure.title.is_some(), authors = structure.authors.len(), "Model metadata extraction");
        Ok(structure)
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(String::from)
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn structure_from_value(value: &Value) -> DocumentStructure {
    // Model-reported identifiers are only trusted when they look like identifiers.
    let doi = string_field(value, "doi").and_then(|d| extract_identifiers(&d).doi);
    let pmid = string_field(value, "pmid").filter(|p| p.chars().all(|c| c.is_ascii_digit()));

    DocumentStructure {
        title: string_field(value, "title"),
        abstract_text: string_field(value, "abstract").map(|a| collapse_whitespace(&strip_markup(&a))),
        authors: string_list(value, "authors").iter().map(|a| split_given_family(a)).collect(),
        keywords: string_list(value, "keywords"),
        identifiers: Identifiers { doi, pmid },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "Journal of Clinical Periodontology\n\
        Effect of platform switching on peri-implant bone levels\n\
        Authors: Maria L. Rossi1, Tom Becker2 and Ana Silva*\n\
        \n\
        Abstract\n\
        Background: crestal bone loss around implants\n\
        was compared over <i>five</i> years.\n\
        \n\
        Keywords: dental implants; platform switching, bone loss, Dental Implants\n\
        \n\
        Introduction\n\
        Implants are widely used.";

    #[test]
    fn test_title_above_heading() {
        let text = "Short\nImplant survival in smokers\n\nAbstract\nWe looked.";
        assert_eq!(extract_title(text).as_deref(), Some("Implant survival in smokers"));
    }

    #[test]
    fn test_title_line_wins() {
        let text = "Running head\nTitle: Guided bone regeneration outcomes\nAbstract\n...";
        assert_eq!(extract_title(text).as_deref(), Some("Guided bone regeneration outcomes"));
    }

    #[test]
    fn test_title_first_plausible_line() {
        let text = "p1\nA randomized trial of enamel matrix derivative\nbody text";
        assert_eq!(
            extract_title(text).as_deref(),
            Some("A randomized trial of enamel matrix derivative")
        );
        assert_eq!(extract_title("x\ny"), None);
    }

    #[test]
    fn test_abstract_until_next_heading() {
        let abs = extract_abstract(ARTICLE).unwrap();
        assert_eq!(abs, "Background: crestal bone loss around implants was compared over five years.");
    }

    #[test]
    fn test_keywords_deduplicated_case_insensitively() {
        assert_eq!(
            extract_keywords(ARTICLE),
            vec!["dental implants", "platform switching", "bone loss"]
        );
    }

    #[test]
    fn test_authors_split_and_cleaned() {
        let authors = extract_authors(ARTICLE);
        let names: Vec<String> = authors.iter().map(Author::display_name).collect();
        assert_eq!(names, vec!["Maria L. Rossi", "Tom Becker", "Ana Silva"]);
        assert_eq!(authors[0].last_name.as_deref(), Some("Rossi"));
    }

    #[tokio::test]
    async fn test_regex_strategy_through_trait() {
        let extractor: &dyn TextStructureExtractor = &RegexStructureExtractor;
        let s = extractor.extract("Title: Peri-implantitis therapy\nPMID: 4242\n").await.unwrap();
        assert_eq!(s.title.as_deref(), Some("Peri-implantitis therapy"));
        assert_eq!(s.identifiers.pmid.as_deref(), Some("4242"));
        let meta = s.into_metadata();
        assert_eq!(meta.pmid.as_deref(), Some("4242"));
    }

    #[test]
    fn test_model_value_normalization() {
        let v = serde_json::json!({
            "title": "  Soft tissue grafts  ",
            "abstract": "<p>Grafts   were placed.</p>",
            "authors": ["Jane Doe", "", "Smith"],
            "keywords": ["grafts"],
            "doi": "https://doi.org/10.1111/jcpe.1",
            "pmid": "not-a-pmid"
        });
        let s = structure_from_value(&v);
        assert_eq!(s.title.as_deref(), Some("Soft tissue grafts"));
        assert_eq!(s.abstract_text.as_deref(), Some("Grafts were placed."));
        assert_eq!(s.authors.len(), 2);
        assert_eq!(s.authors[1].last_name.as_deref(), Some("Smith"));
        assert_eq!(s.identifiers.doi.as_deref(), Some("10.1111/jcpe.1"));
        assert!(s.identifiers.pmid.is_none());
    }
}
