use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::error::ExtractionError;
use crate::normalizer::normalize_name;
use crate::schema::{DateSpan, Entity, Evidence, ExtractionCandidate, ModelTier, Relation, RelationKind};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("code fence regex is valid")
});

#[derive(Deserialize)]
struct RawExtraction {
    entities: Vec<Entity>,
    relations: Vec<RawRelation>,
    #[serde(default)]
    tech_terms: Vec<String>,
    #[serde(default)]
    dates: Vec<DateSpan>,
}

#[derive(Deserialize)]
struct RawRelation {
    source: String,
    target: String,
    relation: String,
    #[serde(default)]
    kind: RelationKind,
    confidence: f64,
    #[serde(default)]
    evidence: Option<RawEvidence>,
}

/// Models emit evidence as a bare quote, a list of quotes, or full objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEvidence {
    One(String),
    Many(Vec<RawEvidenceItem>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEvidenceItem {
    Text(String),
    Full(Evidence),
}

impl RawEvidence {
    fn into_evidence(self) -> Vec<Evidence> {
        match self {
            Self::One(snippet) => vec![Evidence::new(snippet)],
            Self::Many(items) => items
                .into_iter()
                .map(|item| match item {
                    RawEvidenceItem::Text(snippet) => Evidence::new(snippet),
                    RawEvidenceItem::Full(evidence) => evidence,
                })
                .collect(),
        }
    }
}

/// Parse raw model output into a shape-validated candidate.
pub fn parse_candidate(
    document_id: &str,
    tier: ModelTier,
    raw: &str,
) -> Result<ExtractionCandidate, ExtractionError> {
    let body = strip_code_fence(raw);
    let parsed: RawExtraction = serde_json::from_str(body)
        .map_err(|e| ExtractionError::SchemaInvalid(format!("unparseable output: {e}")))?;

    let relations = parsed
        .relations
        .into_iter()
        .map(|r| Relation {
            source: r.source,
            target: r.target,
            rel_type: r.relation,
            kind: r.kind,
            confidence: r.confidence,
            evidence: r.evidence.map(RawEvidence::into_evidence).unwrap_or_default(),
        })
        .collect();

    let candidate = ExtractionCandidate {
        document_id: document_id.to_string(),
        model_tier: tier,
        entities: parsed.entities,
        relations,
        tech_terms: parsed
            .tech_terms
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect(),
        dates: parsed
            .dates
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .collect(),
        raw_char_length: raw.chars().count(),
    };

    validate_shape(&candidate)?;
    Ok(candidate)
}

fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

/// Structural checks that must hold before a candidate may be gated or scored.
pub fn validate_shape(candidate: &ExtractionCandidate) -> Result<(), ExtractionError> {
    for (i, entity) in candidate.entities.iter().enumerate() {
        if normalize_name(&entity.name).is_empty() {
            return Err(ExtractionError::SchemaInvalid(format!(
                "entity {} has an empty name",
                i + 1
            )));
        }
        if entity.entity_type.trim().is_empty() {
            return Err(ExtractionError::SchemaInvalid(format!(
                "entity '{}' has an empty type",
                entity.name
            )));
        }
    }

    for (i, relation) in candidate.relations.iter().enumerate() {
        if normalize_name(&relation.source).is_empty() || normalize_name(&relation.target).is_empty() {
            return Err(ExtractionError::SchemaInvalid(format!(
                "relation {} has an empty endpoint",
                i + 1
            )));
        }
        if relation.rel_type.trim().is_empty() {
            return Err(ExtractionError::SchemaInvalid(format!(
                "relation {} has an empty type",
                i + 1
            )));
        }
        if !relation.confidence.is_finite() || !(0.0..=1.0).contains(&relation.confidence) {
            return Err(ExtractionError::SchemaInvalid(format!(
                "relation {} confidence {} outside [0, 1]",
                i + 1,
                relation.confidence
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "entities": [
            {"name": "Tokio", "type": "TECHNOLOGY"},
            {"name": "Rust", "type": "TECHNOLOGY", "aliases": ["rust-lang"]}
        ],
        "relations": [
            {"source": "Tokio", "target": "Rust", "relation": "written_in", "kind": "asserted",
             "confidence": 0.9, "evidence": "Tokio is written in Rust"},
            {"source": "Tokio", "target": "rust-lang", "relation": "depends_on", "kind": "inferred",
             "confidence": 0.6, "evidence": [{"snippet": "runtime", "source_text_ref": "p1"}, "async"]}
        ],
        "tech_terms": ["async runtime", "  "],
        "dates": [{"text": "2016"}]
    }"#;

    #[test]
    fn test_parses_all_evidence_shapes() {
        let candidate = parse_candidate("doc-1", ModelTier::Primary, VALID).unwrap();

        assert_eq!(candidate.document_id, "doc-1");
        assert_eq!(candidate.entities.len(), 2);
        assert_eq!(candidate.relations[0].evidence, vec![Evidence::new("Tokio is written in Rust")]);
        assert_eq!(candidate.relations[1].evidence.len(), 2);
        assert_eq!(candidate.relations[1].evidence[0].source_text_ref.as_deref(), Some("p1"));
        assert_eq!(candidate.relations[1].kind, RelationKind::Inferred);
        assert_eq!(candidate.tech_terms, vec!["async runtime".to_string()]);
        assert_eq!(candidate.raw_char_length, VALID.chars().count());
    }

    #[test]
    fn test_strips_markdown_fence() {
        let fenced = format!("```json\n{}\n```", VALID);
        let candidate = parse_candidate("doc-1", ModelTier::Understudy, &fenced).unwrap();
        assert_eq!(candidate.model_tier, ModelTier::Understudy);
        assert_eq!(candidate.relations.len(), 2);
    }

    #[test]
    fn test_rejects_non_json() {
        let err = parse_candidate("doc-1", ModelTier::Primary, "Sure! Here are the entities").unwrap_err();
        assert!(err.is_schema_invalid());
    }

    #[test]
    fn test_rejects_missing_relations_key() {
        let err = parse_candidate("doc-1", ModelTier::Primary, r#"{"entities": []}"#).unwrap_err();
        assert!(err.is_schema_invalid());
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let raw = r#"{"entities": [{"name": "a", "type": "X"}, {"name": "b", "type": "X"}],
                      "relations": [{"source": "a", "target": "b", "relation": "uses", "confidence": 1.4}]}"#;
        let err = parse_candidate("doc-1", ModelTier::Primary, raw).unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn test_rejects_blank_entity_name() {
        let raw = r#"{"entities": [{"name": " ! ", "type": "X"}], "relations": []}"#;
        assert!(parse_candidate("doc-1", ModelTier::Primary, raw).is_err());
    }
}
