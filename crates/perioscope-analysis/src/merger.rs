//! Folding per-chunk analyses into one document-level result.
//!
//! Merge rules:
//!   - list fields    set union, first-seen order, exact-string dedupe
//!   - score fields   arithmetic mean rounded to the nearest integer
//!   - boolean flags  logical AND
//!   - descriptions   first chunk's value
//!
//! Every rule is order-independent except "first chunk wins", which follows
//! chunk index order; callers sort by index before merging.

use std::collections::HashSet;

use chrono::Utc;
use perioscope_common::{PerioscopeError, Result};

use crate::models::{AnalysisResult, ChunkAnalysis, ResearchConcept};

/// Merge chunk analyses. Fails with `NoValidResults` on an empty list.
pub fn merge(results: Vec<ChunkAnalysis>) -> Result<AnalysisResult> {
    let count = results.len();
    let mut iter = results.into_iter();
    let Some(mut acc) = iter.next() else {
        return Err(PerioscopeError::NoValidResults);
    };

    dedupe_lists(&mut acc);
    let mut scores = ScoreSums::from(&acc);
    for next in iter {
        scores.add(&next);
        absorb(&mut acc, next);
    }
    scores.write_means(&mut acc, count);

    Ok(AnalysisResult {
        analysis: acc.analysis,
        statistical_validation: acc.statistical_validation,
        perio_relevance: acc.perio_relevance,
        methodology_quality: acc.methodology_quality,
        metadata: None,
        deep_analysis: None,
        selected_topics: Vec::new(),
        chunks_analyzed: count,
        chunks_failed: 0,
        analyzed_at: Utc::now(),
    })
}

/// Drops concepts whose `main_claim` was already seen, keeping first-seen order.
pub fn dedupe_concepts(concepts: Vec<ResearchConcept>) -> Vec<ResearchConcept> {
    let mut seen = HashSet::new();
    concepts
        .into_iter()
        .filter(|c| seen.insert(c.main_claim.clone()))
        .collect()
}

// ── Internals ─────────────────────────────────────────────────────────────────

fn dedupe_in_place(list: &mut Vec<String>) {
    let mut seen = HashSet::new();
    list.retain(|item| seen.insert(item.clone()));
}

/// Collapses repeats inside the seed chunk's own lists.
fn dedupe_lists(acc: &mut ChunkAnalysis) {
    let a = &mut acc.analysis;
    dedupe_in_place(&mut a.methodology.concerns);
    dedupe_in_place(&mut a.statistics.methods);
    dedupe_in_place(&mut a.statistics.concerns);
    dedupe_in_place(&mut a.clinical_relevance.implications);
    dedupe_in_place(&mut a.perio.relevant_conditions);
    dedupe_in_place(&mut a.perio.treatments);
    dedupe_in_place(&mut a.perio.outcomes);

    let sv = &mut acc.statistical_validation;
    dedupe_in_place(&mut sv.concerns);
    dedupe_in_place(&mut sv.suggestions);

    let pr = &mut acc.perio_relevance;
    dedupe_in_place(&mut pr.conditions);
    dedupe_in_place(&mut pr.clinical_implications);
    dedupe_in_place(&mut pr.research_gaps);

    let mq = &mut acc.methodology_quality;
    dedupe_in_place(&mut mq.strengths);
    dedupe_in_place(&mut mq.weaknesses);
    dedupe_in_place(&mut mq.recommendations);
}

fn union(acc: &mut Vec<String>, more: Vec<String>) {
    let mut seen: HashSet<String> = acc.iter().cloned().collect();
    for item in more {
        if seen.insert(item.clone()) {
            acc.push(item);
        }
    }
}

/// Folds `next` into `acc`: lists union, flags AND. Scalars stay as `acc` has them.
fn absorb(acc: &mut ChunkAnalysis, next: ChunkAnalysis) {
    let a = &mut acc.analysis;
    let n = next.analysis;
    union(&mut a.methodology.concerns, n.methodology.concerns);
    union(&mut a.statistics.methods, n.statistics.methods);
    union(&mut a.statistics.concerns, n.statistics.concerns);
    a.statistics.appropriateness &= n.statistics.appropriateness;
    union(&mut a.clinical_relevance.implications, n.clinical_relevance.implications);
    union(&mut a.perio.relevant_conditions, n.perio.relevant_conditions);
    union(&mut a.perio.treatments, n.perio.treatments);
    union(&mut a.perio.outcomes, n.perio.outcomes);

    let sv = &mut acc.statistical_validation;
    sv.is_valid &= next.statistical_validation.is_valid;
    union(&mut sv.concerns, next.statistical_validation.concerns);
    union(&mut sv.suggestions, next.statistical_validation.suggestions);

    let pr = &mut acc.perio_relevance;
    union(&mut pr.conditions, next.perio_relevance.conditions);
    union(&mut pr.clinical_implications, next.perio_relevance.clinical_implications);
    union(&mut pr.research_gaps, next.perio_relevance.research_gaps);

    let mq = &mut acc.methodology_quality;
    union(&mut mq.strengths, next.methodology_quality.strengths);
    union(&mut mq.weaknesses, next.methodology_quality.weaknesses);
    union(&mut mq.recommendations, next.methodology_quality.recommendations);
}

#[derive(Default)]
struct ScoreSums {
    clinical: f64,
    relevance: f64,
    quality: f64,
}

impl ScoreSums {
    fn from(first: &ChunkAnalysis) -> Self {
        let mut sums = Self::default();
        sums.add(first);
        sums
    }

    fn add(&mut self, c: &ChunkAnalysis) {
        self.clinical += c.analysis.clinical_relevance.score;
        self.relevance += c.perio_relevance.relevance_score;
        self.quality += c.methodology_quality.score;
    }

    fn write_means(&self, acc: &mut ChunkAnalysis, count: usize) {
        let n = count as f64;
        acc.analysis.clinical_relevance.score = (self.clinical / n).round();
        acc.perio_relevance.relevance_score = (self.relevance / n).round();
        acc.methodology_quality.score = (self.quality / n).round();
    }
}
