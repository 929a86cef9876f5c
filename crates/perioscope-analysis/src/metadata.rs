//! Bibliographic metadata resolution over an ordered provider chain.
//!
//! The standard chain is
//!   PMID(PubMed) → DOI(PubMed) → DOI(CrossRef) → Title(PubMed)
//!     → Title(CrossRef) → Title(Semantic Scholar) → model extraction from text
//!
//! Each stage runs only when its key is known (from the caller, or from a
//! record an earlier stage returned). Results are folded in with
//! `ArticleMetadata::merge_from`, so earlier stages own every field they fill.
//! A failing stage is logged and skipped. Resolution stops early once title,
//! authors and journal are all present.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use perioscope_common::{PerioscopeError, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::models::{ArticleMetadata, Identifiers};
use crate::sources::BibliographicProvider;
use crate::structure::TextStructureExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKey {
    Pmid,
    Doi,
    Title,
    Text,
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LookupKey::Pmid  => "pmid",
            LookupKey::Doi   => "doi",
            LookupKey::Title => "title",
            LookupKey::Text  => "text",
        };
        f.write_str(s)
    }
}

enum StageSource {
    Provider(Arc<dyn BibliographicProvider>),
    Extractor(Arc<dyn TextStructureExtractor>),
}

struct ResolutionStage {
    key: LookupKey,
    source: StageSource,
}

impl ResolutionStage {
    fn label(&self) -> String {
        let name = match &self.source {
            StageSource::Provider(p) => p.name(),
            StageSource::Extractor(e) => e.name(),
        };
        format!("{}:{}", self.key, name)
    }
}

/// Outcome of a resolution run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMetadata {
    pub metadata: ArticleMetadata,
    /// Stages that filled at least one field, in chain order.
    pub contributing_stages: Vec<String>,
    /// Stages that were actually called.
    pub attempted_stages: Vec<String>,
}

pub struct MetadataResolver {
    stages: Vec<ResolutionStage>,
    call_timeout: Duration,
}

impl MetadataResolver {
    pub fn new(call_timeout: Duration) -> Self {
        Self { stages: Vec::new(), call_timeout }
    }

    /// The standard chain: A = PubMed, B = CrossRef, C = similarity-matched
    /// title search, then model extraction over the document text.
    pub fn standard(
        provider_a: Arc<dyn BibliographicProvider>,
        provider_b: Arc<dyn BibliographicProvider>,
        provider_c: Arc<dyn BibliographicProvider>,
        text_fallback: Arc<dyn TextStructureExtractor>,
        call_timeout: Duration,
    ) -> Self {
        Self::new(call_timeout)
            .with_stage(LookupKey::Pmid, provider_a.clone())
            .with_stage(LookupKey::Doi, provider_a.clone())
            .with_stage(LookupKey::Doi, provider_b.clone())
            .with_stage(LookupKey::Title, provider_a)
            .with_stage(LookupKey::Title, provider_b)
            .with_stage(LookupKey::Title, provider_c)
            .with_text_fallback(text_fallback)
    }

    /// Appends a keyed provider stage. `LookupKey::Text` is reserved for
    /// `with_text_fallback` and is treated as a title lookup here.
    pub fn with_stage(mut self, key: LookupKey, provider: Arc<dyn BibliographicProvider>) -> Self {
        let key = if key == LookupKey::Text { LookupKey::Title } else { key };
        self.stages.push(ResolutionStage { key, source: StageSource::Provider(provider) });
        self
    }

    pub fn with_text_fallback(mut self, extractor: Arc<dyn TextStructureExtractor>) -> Self {
        self.stages.push(ResolutionStage {
            key: LookupKey::Text,
            source: StageSource::Extractor(extractor),
        });
        self
    }

    pub fn stage_labels(&self) -> Vec<String> {
        self.stages.iter().map(ResolutionStage::label).collect()
    }

    /// Resolve metadata for one document.
    ///
    /// `text` feeds the final extraction stage, so resolution still has a
    /// chance when no identifier or title is known. Keys the extraction
    /// stage discovers get one more pass through the keyed stages. `title`
    /// is kept as the last-resort title when no stage returns one.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn resolve(
        &self,
        identifiers: &Identifiers,
        title: Option<&str>,
        text: &str,
    ) -> Result<ResolvedMetadata> {
        let mut run = ResolutionRun::default();

        for (index, stage) in self.stages.iter().enumerate() {
            let Some(input) = stage_input(stage.key, identifiers, title, text, &run.metadata) else {
                debug!(stage = %stage.label(), "Skipping stage without its lookup key");
                continue;
            };
            if self.attempt(index, stage, input, &mut run).await {
                break;
            }
        }

        if !run.metadata.is_complete() && run.text_contributed {
            for (index, stage) in self.stages.iter().enumerate() {
                let Some(input) = discovered_key(stage.key, &run.metadata) else {
                    continue;
                };
                if run.tried.contains(&(index, input.clone())) {
                    continue;
                }
                debug!(stage = %stage.label(), "Retrying keyed stage with an extracted key");
                if self.attempt(index, stage, input, &mut run).await {
                    break;
                }
            }
        }

        let ResolutionRun { mut metadata, contributing_stages, attempted_stages, .. } = run;

        // Caller-known keys are the lowest-priority source.
        metadata.merge_from(ArticleMetadata {
            doi: identifiers.doi.clone(),
            pmid: identifiers.pmid.clone(),
            title: title.and_then(non_empty),
            ..Default::default()
        });

        if metadata.title.is_none() {
            return Err(PerioscopeError::MetadataUnresolved(format!(
                "no stage produced a title (attempted: {})",
                if attempted_stages.is_empty() { "none".to_string() } else { attempted_stages.join(", ") }
            )));
        }

        info!(
            contributing = ?contributing_stages,
            complete = metadata.is_complete(),
            "Metadata resolved"
        );
        Ok(ResolvedMetadata { metadata, contributing_stages, attempted_stages })
    }

    /// Runs one stage under the call timeout and folds its record into `run`.
    /// Returns true once the record is complete.
    async fn attempt(&self, index: usize, stage: &ResolutionStage, input: String, run: &mut ResolutionRun) -> bool {
        let label = stage.label();
        run.attempted_stages.push(label.clone());

        let lookup = run_stage(stage, &input);
        match tokio::time::timeout(self.call_timeout, lookup).await {
            Ok(Ok(Some(found))) => {
                let filled = run.metadata.merge_from(found);
                debug!(stage = %label, filled, "Stage returned metadata");
                if filled > 0 {
                    if stage.key == LookupKey::Text {
                        run.text_contributed = true;
                    }
                    run.contributing_stages.push(label.clone());
                }
            }
            Ok(Ok(None)) => debug!(stage = %label, "Stage found nothing"),
            Ok(Err(e)) => warn!(stage = %label, error = %e, "Metadata stage failed, continuing"),
            Err(_) => warn!(
                stage = %label,
                timeout_secs = self.call_timeout.as_secs(),
                "Metadata stage timed out, continuing"
            ),
        }
        run.tried.insert((index, input));

        let complete = run.metadata.is_complete();
        if complete {
            info!(stage = %label, "Metadata complete, stopping resolution early");
        }
        complete
    }
}

#[derive(Default)]
struct ResolutionRun {
    metadata: ArticleMetadata,
    contributing_stages: Vec<String>,
    attempted_stages: Vec<String>,
    /// (stage index, input) pairs already sent.
    tried: HashSet<(usize, String)>,
    text_contributed: bool,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn stage_input(
    key: LookupKey,
    identifiers: &Identifiers,
    title: Option<&str>,
    text: &str,
    so_far: &ArticleMetadata,
) -> Option<String> {
    let given = |s: Option<&String>| s.and_then(|s| non_empty(s));
    match key {
        LookupKey::Pmid => given(identifiers.pmid.as_ref()).or_else(|| given(so_far.pmid.as_ref())),
        LookupKey::Doi => given(identifiers.doi.as_ref()).or_else(|| given(so_far.doi.as_ref())),
        LookupKey::Title => title.and_then(non_empty).or_else(|| given(so_far.title.as_ref())),
        LookupKey::Text => (!text.trim().is_empty()).then(|| text.to_string()),
    }
}

/// Keys held by the record built so far, for the retry pass.
fn discovered_key(key: LookupKey, so_far: &ArticleMetadata) -> Option<String> {
    let field = match key {
        LookupKey::Pmid => so_far.pmid.as_deref(),
        LookupKey::Doi => so_far.doi.as_deref(),
        LookupKey::Title => so_far.title.as_deref(),
        LookupKey::Text => None,
    };
    field.and_then(non_empty)
}

async fn run_stage(stage: &ResolutionStage, input: &str) -> Result<Option<ArticleMetadata>> {
    match (&stage.source, stage.key) {
        (StageSource::Provider(p), LookupKey::Pmid) => p.lookup_pmid(input).await,
        (StageSource::Provider(p), LookupKey::Doi) => p.lookup_doi(input).await,
        (StageSource::Provider(p), _) => p.lookup_title(input).await,
        (StageSource::Extractor(e), _) => {
            let structure = e.extract(input).await?;
            let metadata = structure.into_metadata();
            Ok((!metadata.is_empty()).then_some(metadata))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_input_prefers_caller_keys() {
        let ids = Identifiers { doi: Some("10.1/a".into()), pmid: None };
        let so_far = ArticleMetadata {
            doi: Some("10.1/b".into()),
            pmid: Some("42".into()),
            title: Some("Found title".into()),
            ..Default::default()
        };
        assert_eq!(stage_input(LookupKey::Doi, &ids, None, "", &so_far).as_deref(), Some("10.1/a"));
        assert_eq!(stage_input(LookupKey::Pmid, &ids, None, "", &so_far).as_deref(), Some("42"));
        assert_eq!(
            stage_input(LookupKey::Title, &ids, Some("Given"), "", &so_far).as_deref(),
            Some("Given")
        );
        assert_eq!(
            stage_input(LookupKey::Title, &ids, Some("  "), "", &ArticleMetadata::default()),
            None
        );
        assert_eq!(stage_input(LookupKey::Text, &ids, None, " \n", &so_far), None);
    }

    #[test]
    fn test_blank_caller_keys_fall_through_to_found_record() {
        let ids = Identifiers { doi: Some(" ".into()), pmid: Some("".into()) };
        let so_far = ArticleMetadata {
            doi: Some("10.1/b".into()),
            pmid: Some("42".into()),
            title: Some("Found title".into()),
            ..Default::default()
        };
        assert_eq!(
            stage_input(LookupKey::Title, &ids, Some("   "), "", &so_far).as_deref(),
            Some("Found title")
        );
        assert_eq!(stage_input(LookupKey::Doi, &ids, None, "", &so_far).as_deref(), Some("10.1/b"));
        assert_eq!(stage_input(LookupKey::Pmid, &ids, None, "", &so_far).as_deref(), Some("42"));
    }

    #[test]
    fn test_discovered_key_ignores_text_and_blanks() {
        let so_far = ArticleMetadata {
            doi: Some("10.1/c".into()),
            title: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(discovered_key(LookupKey::Doi, &so_far).as_deref(), Some("10.1/c"));
        assert_eq!(discovered_key(LookupKey::Title, &so_far), None);
        assert_eq!(discovered_key(LookupKey::Pmid, &so_far), None);
        assert_eq!(discovered_key(LookupKey::Text, &so_far), None);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unresolved() {
        let resolver = MetadataResolver::new(Duration::from_secs(1));
        let err = resolver.resolve(&Identifiers::default(), None, "text").await.unwrap_err();
        assert!(matches!(err, PerioscopeError::MetadataUnresolved(_)));
    }
}
