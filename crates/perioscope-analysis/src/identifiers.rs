//! DOI / PMID recovery from raw document text.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Identifiers;

fn doi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"10\.\d{4,}(?:\.\d+)*/[^\s"'<>]+"#).expect("static regex"))
}

fn pmid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PMID:\s*(\d+)").expect("static regex"))
}

/// First DOI and first `PMID:` tag in the text. Never fails.
pub fn extract_identifiers(text: &str) -> Identifiers {
    let doi = doi_regex()
        .find(text)
        .map(|m| clean_doi(m.as_str()))
        .filter(|d| !d.is_empty());

    let pmid = pmid_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Identifiers { doi, pmid }
}

/// Drops publisher landing-page suffixes and sentence punctuation
/// that the greedy pattern swallows.
fn clean_doi(raw: &str) -> String {
    let base = match raw.find("/full") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    base.trim_end_matches(['.', ',', ';', ':', ')', ']']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmid_only() {
        let ids = extract_identifiers("Abstract: implants were placed ... PMID: 123456 ...");
        assert_eq!(ids, Identifiers { doi: None, pmid: Some("123456".to_string()) });
    }

    #[test]
    fn test_pmid_case_insensitive_without_space() {
        let ids = extract_identifiers("pmid:987 and later PMID: 111");
        assert_eq!(ids.pmid.as_deref(), Some("987"));
    }

    #[test]
    fn test_doi_first_match_only() {
        let text = "doi: 10.1111/jcpe.13290 see also https://doi.org/10.1016/j.dental.2020.01.002";
        let ids = extract_identifiers(text);
        assert_eq!(ids.doi.as_deref(), Some("10.1111/jcpe.13290"));
    }

    #[test]
    fn test_doi_stops_at_quotes_and_brackets() {
        let ids = extract_identifiers(r#"<a href="https://doi.org/10.1002/JPER.19-0123">link</a>"#);
        assert_eq!(ids.doi.as_deref(), Some("10.1002/JPER.19-0123"));
    }

    #[test]
    fn test_doi_trailing_punctuation_and_full_suffix() {
        let ids = extract_identifiers("Available at 10.3389/fdmed.2021.00012/full. Accessed.");
        assert_eq!(ids.doi.as_deref(), Some("10.3389/fdmed.2021.00012"));
        let ids = extract_identifiers("(doi 10.1111/clr.13444).");
        assert_eq!(ids.doi.as_deref(), Some("10.1111/clr.13444"));
    }

    #[test]
    fn test_no_identifiers() {
        let ids = extract_identifiers("Nothing to see, 10.5 mm defects and PMID missing.");
        assert!(ids.is_empty());
    }
}
