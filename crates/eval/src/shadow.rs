use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

use extract::{ExtractionCandidate, normalize_name, normalize_text};

use crate::Evaluation;

/// How closely the primary candidate tracks the understudy on one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgreementStats {
    pub entity_overlap: f64,
    pub relation_overlap: f64,
    pub tech_term_overlap: f64,
    pub primary_combined: f64,
    pub understudy_combined: f64,
    /// understudy minus primary.
    pub combined_delta: f64,
    pub primary_gates_passed: bool,
    pub understudy_gates_passed: bool,
}

fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

fn entity_names(candidate: &ExtractionCandidate) -> HashSet<String> {
    candidate.entities.iter().map(|e| normalize_name(&e.name)).collect()
}

fn relation_triples(candidate: &ExtractionCandidate) -> HashSet<(String, String, String)> {
    candidate
        .relations
        .iter()
        .map(|r| {
            (
                normalize_name(&r.source),
                normalize_text(&r.rel_type),
                normalize_name(&r.target),
            )
        })
        .collect()
}

fn tech_terms(candidate: &ExtractionCandidate) -> HashSet<String> {
    candidate.tech_terms.iter().map(|t| normalize_text(t)).collect()
}

pub fn compare_candidates(
    primary: &ExtractionCandidate,
    primary_eval: &Evaluation,
    understudy: &ExtractionCandidate,
    understudy_eval: &Evaluation,
) -> AgreementStats {
    let primary_combined = primary_eval.score.combined;
    let understudy_combined = understudy_eval.score.combined;

    AgreementStats {
        entity_overlap: jaccard(&entity_names(primary), &entity_names(understudy)),
        relation_overlap: jaccard(&relation_triples(primary), &relation_triples(understudy)),
        tech_term_overlap: jaccard(&tech_terms(primary), &tech_terms(understudy)),
        primary_combined,
        understudy_combined,
        combined_delta: understudy_combined - primary_combined,
        primary_gates_passed: primary_eval.gates_passed(),
        understudy_gates_passed: understudy_eval.gates_passed(),
    }
}
