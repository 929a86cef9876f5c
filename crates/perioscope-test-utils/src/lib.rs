//! Shared testing utilities for the Perioscope workspace.
//!
//! Mocks for every external seam (completion backend, bibliographic
//! providers, literature search) plus a few canned fixtures.

pub mod llm;
pub mod providers;

pub use llm::MockLlmBackend;
pub use pretty_assertions;
pub use providers::{MockBibliographicProvider, MockLiteratureSearch};

use perioscope_analysis::models::{ArticleMetadata, Author};
use serde_json::{json, Value};

/// A short article with a title, abstract, keywords and a PMID line.
pub const SAMPLE_ARTICLE: &str = "\
Title: Primary stability of tapered implants in low-density bone

Authors: Ana Silva, Jorge Pereira

Abstract: This randomized trial evaluated primary stability of tapered implants in type IV bone. \
Insertion torque and ISQ were recorded at placement. Tapered implants reached higher ISQ values.

Keywords: dental implants; implant stability; bone density

PMID: 123456

Introduction

Primary stability is a prerequisite for osseointegration, particularly in the posterior maxilla.

Methods

Forty patients received either tapered or parallel-walled implants. ISQ was compared with a t-test.";

/// A complete chunk-analysis reply.
pub fn chunk_analysis_json(score: f64, statistics_valid: bool) -> Value {
    json!({
        "analysis": {
            "studyType": "Randomized controlled trial",
            "methodology": {"type": "Parallel group", "description": "Two arms", "concerns": ["small sample"]},
            "statistics": {"methods": ["t-test"], "appropriateness": statistics_valid, "concerns": []},
            "clinicalRelevance": {"score": score, "explanation": "Relevant to posterior maxilla", "implications": []},
            "evidenceLevel": {"level": "1b", "description": "Individual RCT"},
            "perio": {"relevantConditions": [], "treatments": ["implant placement"], "outcomes": ["ISQ"]}
        },
        "statisticalValidation": {"isValid": statistics_valid, "concerns": [], "suggestions": []},
        "perioRelevance": {"relevanceScore": score, "conditions": [], "clinicalImplications": [], "researchGaps": []},
        "methodologyQuality": {"score": score, "strengths": ["randomized"], "weaknesses": [], "recommendations": []}
    })
}

/// A concept-extraction reply with one concept per claim.
pub fn concepts_json(claims: &[&str]) -> Value {
    let concepts: Vec<Value> = claims
        .iter()
        .map(|claim| {
            json!({
                "main_claim": claim,
                "methodology": {"study_design": "RCT", "details": "n=40"},
                "statistical_evidence": {"tests": "t-test", "results": "p<0.05"},
                "clinical_implications": "Affects implant protocol selection"
            })
        })
        .collect();
    json!({ "concepts": concepts })
}

pub fn synthesis_json(confidence: f64) -> Value {
    json!({
        "validatedClaims": [{"claim": "Tapered implants improve ISQ", "sources": ["Study A"], "validationScore": 80}],
        "relatedFindings": [],
        "clinicalImplications": ["Prefer tapered designs in soft bone"],
        "researchGaps": [],
        "confidenceScore": confidence
    })
}

/// Metadata that satisfies the completeness check.
pub fn complete_metadata(title: &str) -> ArticleMetadata {
    ArticleMetadata {
        title: Some(title.to_string()),
        authors: vec![Author {
            first_name: Some("Ana".to_string()),
            last_name: Some("Silva".to_string()),
            affiliation: None,
        }],
        journal: Some("Clinical Oral Implants Research".to_string()),
        publication_year: Some(2022),
        ..Default::default()
    }
}
