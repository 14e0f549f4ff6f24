//! Deterministic fidelity gates.
//!
//! Each gate is an independent pass/fail check over one candidate and the
//! document it was extracted from. Gates never look at the quality score and
//! a single failure is enough to force escalation. All gates always run so
//! the audit trail carries every measurement, not just the first failure.

use serde::{Deserialize, Serialize};

use extract::{EntityIndex, ExtractionCandidate, Relation, normalize_text};

use crate::config::ModeConfig;

/// Outcome of one gate on one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub measured_value: f64,
    pub threshold: f64,
    pub failing_examples: Vec<String>,
}

/// Source text with its normalized form computed once per evaluation.
pub struct SourceText {
    normalized: String,
    char_length: usize,
}

impl SourceText {
    pub fn new(raw: &str) -> Self {
        Self {
            normalized: normalize_text(raw),
            char_length: raw.chars().count(),
        }
    }

    pub fn char_length(&self) -> usize {
        self.char_length
    }

    /// Normalized substring containment. Blank snippets never match.
    pub fn contains_snippet(&self, snippet: &str) -> bool {
        let needle = normalize_text(snippet);
        !needle.is_empty() && self.normalized.contains(&needle)
    }

    /// A relation's own evidence holds when it has at least one snippet and
    /// every snippet is found in the source.
    pub fn supports(&self, relation: &Relation) -> bool {
        relation.has_evidence() && relation.snippets().all(|s| self.contains_snippet(s))
    }
}

pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, candidate: &ExtractionCandidate, source: &SourceText, config: &ModeConfig) -> GateResult;
}

pub struct EvidenceFidelityGate;

impl Gate for EvidenceFidelityGate {
    fn name(&self) -> &'static str {
        "evidence_fidelity"
    }

    fn evaluate(&self, candidate: &ExtractionCandidate, source: &SourceText, config: &ModeConfig) -> GateResult {
        let mut total = 0usize;
        let mut matched = 0usize;
        let mut failing = Vec::new();

        for (index, relation) in candidate.asserted_relations() {
            // An asserted relation without evidence counts as one unmatched item.
            if !relation.has_evidence() {
                total += 1;
                failing.push(format!("{}: no evidence", relation.label(index)));
                continue;
            }
            for snippet in relation.snippets() {
                total += 1;
                if source.contains_snippet(snippet) {
                    matched += 1;
                } else {
                    failing.push(format!("{}: \"{}\"", relation.label(index), snippet));
                }
            }
        }

        // Nothing asserted means nothing to disprove.
        let match_rate = if total == 0 { 1.0 } else { matched as f64 / total as f64 };
        let threshold = config.gates.evidence_fidelity_min;

        GateResult {
            name: self.name().to_string(),
            passed: match_rate >= threshold,
            measured_value: match_rate,
            threshold,
            failing_examples: failing,
        }
    }
}

pub struct OrphanEndpointsGate;

impl Gate for OrphanEndpointsGate {
    fn name(&self) -> &'static str {
        "orphan_endpoints"
    }

    fn evaluate(&self, candidate: &ExtractionCandidate, _source: &SourceText, config: &ModeConfig) -> GateResult {
        let index = EntityIndex::new(&candidate.entities);
        let mut failing = Vec::new();

        for (i, relation) in candidate.relations.iter().enumerate() {
            let missing: Vec<&str> = [("source", &relation.source), ("target", &relation.target)]
                .into_iter()
                .filter(|(_, name)| !index.contains(name))
                .map(|(end, _)| end)
                .collect();
            if !missing.is_empty() {
                failing.push(format!("{}: unknown {}", relation.label(i), missing.join(" and ")));
            }
        }

        let total = candidate.relations.len();
        let orphan_rate = if total == 0 {
            0.0
        } else {
            failing.len() as f64 / total as f64
        };
        let threshold = config.gates.orphan_tolerance_max;

        GateResult {
            name: self.name().to_string(),
            passed: orphan_rate <= threshold,
            measured_value: orphan_rate,
            threshold,
            failing_examples: failing,
        }
    }
}

/// Coarse document size classes used by the zero-value gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBucket {
    Short,
    Medium,
    Large,
}

impl LengthBucket {
    pub fn classify(char_length: usize, config: &ModeConfig) -> Self {
        if char_length < config.gates.short_char_length_max {
            Self::Short
        } else if char_length < config.gates.large_char_length_min {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn is_trivial(self) -> bool {
        self == Self::Short
    }
}

pub struct ZeroValueGate;

impl Gate for ZeroValueGate {
    fn name(&self) -> &'static str {
        "zero_value_pattern"
    }

    fn evaluate(&self, candidate: &ExtractionCandidate, source: &SourceText, config: &ModeConfig) -> GateResult {
        let bucket = LengthBucket::classify(source.char_length(), config);
        let entities = candidate.entities.len();
        let relations = candidate.relations.len();
        let floor = config.gates.relation_entity_floor;
        let mut failing = Vec::new();

        if !bucket.is_trivial() && entities == 0 {
            failing.push(format!(
                "{:?} document ({} chars) produced no entities",
                bucket,
                source.char_length()
            ));
        }
        if entities > floor && relations == 0 {
            failing.push(format!("{entities} entities but no relations (floor {floor})"));
        }

        GateResult {
            name: self.name().to_string(),
            passed: failing.is_empty(),
            measured_value: entities as f64,
            threshold: floor as f64,
            failing_examples: failing,
        }
    }
}

pub struct HighConfidenceBadEvidenceGate;

impl Gate for HighConfidenceBadEvidenceGate {
    fn name(&self) -> &'static str {
        "high_confidence_bad_evidence"
    }

    fn evaluate(&self, candidate: &ExtractionCandidate, source: &SourceText, config: &ModeConfig) -> GateResult {
        let threshold = config.gates.high_confidence_threshold;
        let mut worst: f64 = 0.0;
        let mut failing = Vec::new();

        for (index, relation) in candidate.asserted_relations() {
            if relation.confidence >= threshold && !source.supports(relation) {
                worst = worst.max(relation.confidence);
                let reason = if relation.has_evidence() {
                    "evidence not found in source"
                } else {
                    "no evidence"
                };
                failing.push(format!(
                    "{} at confidence {:.2}: {}",
                    relation.label(index),
                    relation.confidence,
                    reason
                ));
            }
        }

        GateResult {
            name: self.name().to_string(),
            passed: failing.is_empty(),
            measured_value: worst,
            threshold,
            failing_examples: failing,
        }
    }
}

/// Fixed, ordered collection of gates. Adding a gate never touches callers.
pub struct GateSet {
    gates: Vec<Box<dyn Gate>>,
}

impl GateSet {
    pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(EvidenceFidelityGate),
            Box::new(OrphanEndpointsGate),
            Box::new(ZeroValueGate),
            Box::new(HighConfidenceBadEvidenceGate),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    pub fn evaluate(&self, candidate: &ExtractionCandidate, source: &SourceText, config: &ModeConfig) -> Vec<GateResult> {
        self.gates
            .iter()
            .map(|gate| gate.evaluate(candidate, source, config))
            .collect()
    }
}

impl Default for GateSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Run the standard gates over one candidate.
pub fn evaluate_gates(candidate: &ExtractionCandidate, source_text: &str, config: &ModeConfig) -> Vec<GateResult> {
    GateSet::standard().evaluate(candidate, &SourceText::new(source_text), config)
}

pub fn all_passed(results: &[GateResult]) -> bool {
    results.iter().all(|r| r.passed)
}

pub fn first_failure(results: &[GateResult]) -> Option<&GateResult> {
    results.iter().find(|r| !r.passed)
}
