//! Selectable research topics offered before deep analysis is requested.
//!
//! Topics come from the article keywords and from abstract phrases that
//! follow a study verb ("we evaluated …"). Selected topic titles are later
//! passed back as `selected_topics` to filter concepts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::structure::DocumentStructure;

const MAX_TOPICS: usize = 8;
const MIN_PHRASE_CHARS: usize = 10;
const MAX_PHRASE_CHARS: usize = 100;
const NO_ABSTRACT_SUMMARY: &str = "Paper analysis pending. Please select topics of interest.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSuggestions {
    pub topics: Vec<Topic>,
    pub summary: String,
}

fn study_verb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:investigate[ds]?|examine[ds]?|evaluate[ds]?|analy[sz]e[ds]?|compare[ds]?|assess(?:ed|es)?|determine[ds]?|measure[ds]?)\s+([^.]+)",
        )
        .expect("static regex")
    })
}

pub fn suggest_topics(structure: &DocumentStructure) -> TopicSuggestions {
    let mut candidates: Vec<Topic> = structure
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| topic(k, format!("Analysis of aspects related to {k} in the context of dental research.")))
        .collect();

    if let Some(abstract_text) = &structure.abstract_text {
        for cap in study_verb_re().captures_iter(abstract_text) {
            let phrase = cap[1].trim();
            let len = phrase.chars().count();
            if len > MIN_PHRASE_CHARS && len < MAX_PHRASE_CHARS {
                candidates.push(topic(
                    phrase,
                    format!("Investigation of {} as described in the paper.", phrase.to_lowercase()),
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    let topics = candidates
        .into_iter()
        .filter(|t| seen.insert(t.title.to_lowercase()))
        .take(MAX_TOPICS)
        .collect();

    TopicSuggestions { topics, summary: summarize(structure.abstract_text.as_deref()) }
}

fn topic(title: &str, description: String) -> Topic {
    Topic { id: Uuid::new_v4().to_string(), title: title.to_string(), description, selected: false }
}

/// First two sentences of the abstract.
fn summarize(abstract_text: Option<&str>) -> String {
    let Some(text) = abstract_text.map(str::trim).filter(|t| !t.is_empty()) else {
        return NO_ABSTRACT_SUMMARY.to_string();
    };
    let sentences: Vec<&str> = text.split('.').map(str::trim).filter(|s| !s.is_empty()).take(2).collect();
    format!("{}.", sentences.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(keywords: &[&str], abstract_text: Option<&str>) -> DocumentStructure {
        DocumentStructure {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            abstract_text: abstract_text.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_topics_from_keywords_and_phrases() {
        let s = structure(
            &["Dental implants", "Bone density"],
            Some("This study evaluated primary stability of tapered implants in type IV bone. \
                  We compared it with. Results were favourable. Further work is needed."),
        );
        let out = suggest_topics(&s);
        let titles: Vec<_> = out.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Dental implants", "Bone density", "primary stability of tapered implants in type IV bone"]
        );
        assert!(out.topics.iter().all(|t| !t.selected && !t.id.is_empty()));
        assert_eq!(
            out.summary,
            "This study evaluated primary stability of tapered implants in type IV bone. We compared it with."
        );
    }

    #[test]
    fn test_topics_dedupe_case_insensitively_and_cap() {
        let keywords = ["Implants", "implants", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8"];
        let out = suggest_topics(&structure(&keywords, None));
        assert_eq!(out.topics.len(), MAX_TOPICS);
        assert_eq!(out.topics[1].title, "a1");
        assert_eq!(out.summary, NO_ABSTRACT_SUMMARY);
    }
}
