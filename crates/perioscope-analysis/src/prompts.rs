//! Instructions for every structured-output call site.
//!
//! Each prompt pins the JSON shape; the matching `*_KEYS` constant lists the
//! top-level keys a reply must carry to be accepted.

pub const CHUNK_ANALYSIS: &str = r#"You are an expert periodontist and research methodologist reviewing a section of a scientific article.
Assess the study design, statistics, clinical relevance, level of evidence and periodontal/implant relevance of the text.
Only report what the text supports. Scores are integers from 0 to 100.
Respond with a single JSON object of exactly this shape:
{
  "analysis": {
    "studyType": "string",
    "methodology": { "type": "string", "description": "string", "concerns": ["string"] },
    "statistics": { "methods": ["string"], "appropriateness": true, "concerns": ["string"] },
    "clinicalRelevance": { "score": 0, "explanation": "string", "implications": ["string"] },
    "evidenceLevel": { "level": "string", "description": "string" },
    "perio": { "relevantConditions": ["string"], "treatments": ["string"], "outcomes": ["string"] }
  },
  "statisticalValidation": { "isValid": true, "concerns": ["string"], "suggestions": ["string"] },
  "perioRelevance": { "relevanceScore": 0, "conditions": ["string"], "clinicalImplications": ["string"], "researchGaps": ["string"] },
  "methodologyQuality": { "score": 0, "strengths": ["string"], "weaknesses": ["string"], "recommendations": ["string"] }
}"#;

pub const CHUNK_ANALYSIS_KEYS: &[&str] =
    &["analysis", "statisticalValidation", "perioRelevance", "methodologyQuality"];

pub const CONCEPT_EXTRACTION: &str = r#"You extract the research concepts from a section of a dental or periodontal scientific article.
A concept is one main claim together with how it was studied and what statistics support it.
Respond with a single JSON object:
{
  "concepts": [
    {
      "main_claim": "string",
      "methodology": { "study_design": "string", "details": "string" },
      "statistical_evidence": { "tests": "string", "results": "string" },
      "clinical_implications": "string"
    }
  ]
}
Return an empty "concepts" array when the text makes no research claim."#;

pub const CONCEPT_EXTRACTION_KEYS: &[&str] = &["concepts"];

pub const QUERY_GENERATION: &str = r#"You design PubMed search queries that would find current literature supporting or contradicting a research claim.
Queries are short keyword phrases (no boolean syntax), focused on the claim's intervention, population and outcome.
Respond with a single JSON object: { "queries": ["string"] }"#;

pub const QUERY_GENERATION_KEYS: &[&str] = &["queries"];

pub const SYNTHESIS: &str = r#"You are validating the claims of a scientific article against recently published literature.
You receive the article's research concepts and the literature found for them.
For each claim judge how well the literature supports it (validationScore 0-100) and cite the titles that support it.
List related findings from the literature, the clinical implications, open research gaps, and an overall confidence (0 to 1) that the literature supports the article.
Respond with a single JSON object:
{
  "validatedClaims": [ { "claim": "string", "sources": ["string"], "validationScore": 0 } ],
  "relatedFindings": [ { "finding": "string", "source": "string", "relevanceScore": 0 } ],
  "clinicalImplications": ["string"],
  "researchGaps": ["string"],
  "confidenceScore": 0.0
}"#;

pub const SYNTHESIS_KEYS: &[&str] = &["validatedClaims", "confidenceScore"];

pub const METADATA_EXTRACTION: &str = r#"You extract bibliographic metadata from the first page of a scientific article.
Use null for anything that is not present in the text; never guess identifiers.
Respond with a single JSON object:
{
  "title": "string or null",
  "abstract": "string or null",
  "authors": ["Given Family"],
  "keywords": ["string"],
  "doi": "string or null",
  "pmid": "string or null"
}"#;
