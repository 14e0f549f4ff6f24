//! Proportional quality signals.
//!
//! Every signal is progress toward a target, clipped to [0, 1]. Cheap models
//! clear fixed floors easily; proportional targets keep shallow and thorough
//! extractions apart.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use extract::{ExtractionCandidate, normalize_text};

use crate::config::{ModeConfig, ScoringTargets, ScoringWeights};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualitySignals {
    pub entity_density: f64,
    pub evidence_coverage: f64,
    pub confidence: f64,
    pub relation_entity_ratio: f64,
    pub relation_type_diversity: f64,
    pub tech_term_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScore {
    pub signals: QualitySignals,
    pub combined: f64,
    pub weights: ScoringWeights,
}

fn clip(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub fn score(candidate: &ExtractionCandidate, source_text: &str, config: &ModeConfig) -> QualityScore {
    let targets = &config.scoring;
    let char_length = source_text.chars().count();

    let signals = QualitySignals {
        entity_density: entity_density(candidate, char_length, targets),
        evidence_coverage: evidence_coverage(candidate),
        confidence: confidence_signal(candidate, targets),
        relation_entity_ratio: relation_entity_ratio(candidate, targets),
        relation_type_diversity: relation_type_diversity(candidate, targets),
        tech_term_score: tech_term_score(candidate, targets),
    };

    let w = &config.weights;
    let combined = clip(
        w.density * signals.entity_density
            + w.evidence_coverage * signals.evidence_coverage
            + w.confidence * signals.confidence
            + w.ratio * signals.relation_entity_ratio
            + w.diversity * signals.relation_type_diversity
            + w.tech_terms * signals.tech_term_score,
    );

    QualityScore {
        signals,
        combined,
        weights: *w,
    }
}

/// Entities per 1000 chars of source, relative to the density target.
pub fn entity_density(candidate: &ExtractionCandidate, char_length: usize, targets: &ScoringTargets) -> f64 {
    let entities = candidate.entities.len() as f64;
    if char_length == 0 {
        return if entities > 0.0 { 1.0 } else { 0.0 };
    }
    let per_thousand = entities / (char_length as f64 / 1000.0);
    clip(per_thousand / targets.density_target)
}

pub fn evidence_coverage(candidate: &ExtractionCandidate) -> f64 {
    let (asserted, with_evidence) = candidate
        .asserted_relations()
        .fold((0usize, 0usize), |(a, e), (_, r)| (a + 1, e + usize::from(r.has_evidence())));
    clip(with_evidence as f64 / asserted.max(1) as f64)
}

/// Mean relation confidence, penalised when the distribution is flat and high.
pub fn confidence_signal(candidate: &ExtractionCandidate, targets: &ScoringTargets) -> f64 {
    let confidences: Vec<f64> = candidate.relations.iter().map(|r| r.confidence).collect();
    if confidences.is_empty() {
        return 0.0;
    }

    let mean = statistical::mean(&confidences);
    let stddev = statistical::population_standard_deviation(&confidences, Some(mean));

    let effective = if stddev < targets.variance_floor && mean > targets.flat_confidence_mean_min {
        mean * targets.flat_confidence_penalty
    } else {
        mean
    };
    clip(effective / targets.confidence_target)
}

pub fn relation_entity_ratio(candidate: &ExtractionCandidate, targets: &ScoringTargets) -> f64 {
    let entities = candidate.entities.len();
    if entities == 0 {
        return 0.0;
    }
    let ratio = candidate.relations.len() as f64 / entities as f64;
    clip(ratio / targets.ratio_target)
}

/// Distinct relation types, not counting the catch-all type.
pub fn relation_type_diversity(candidate: &ExtractionCandidate, targets: &ScoringTargets) -> f64 {
    let catch_all = normalize_text(&targets.catch_all_relation_type);
    let distinct: HashSet<String> = candidate
        .relations
        .iter()
        .map(|r| normalize_text(&r.rel_type))
        .filter(|t| !t.is_empty() && *t != catch_all)
        .collect();
    clip(distinct.len() as f64 / targets.diversity_target)
}

pub fn tech_term_score(candidate: &ExtractionCandidate, targets: &ScoringTargets) -> f64 {
    let distinct: HashSet<String> = candidate
        .tech_terms
        .iter()
        .map(|t| normalize_text(t))
        .filter(|t| !t.is_empty())
        .collect();
    clip(distinct.len() as f64 / targets.tech_term_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Entity, Evidence, ModelTier, Relation, RelationKind};

    fn entities(n: usize) -> Vec<Entity> {
        (0..n)
            .map(|i| Entity {
                name: format!("E{i}"),
                entity_type: "CONCEPT".to_string(),
                aliases: vec![],
            })
            .collect()
    }

    fn relations(types: &[&str], confidences: &[f64]) -> Vec<Relation> {
        confidences
            .iter()
            .enumerate()
            .map(|(i, c)| Relation {
                source: "E0".to_string(),
                target: "E1".to_string(),
                rel_type: types[i % types.len()].to_string(),
                kind: RelationKind::Asserted,
                confidence: *c,
                evidence: vec![Evidence::new("quote")],
            })
            .collect()
    }

    fn candidate(entity_count: usize, relations: Vec<Relation>, tech_terms: &[&str]) -> ExtractionCandidate {
        ExtractionCandidate {
            document_id: "doc".to_string(),
            model_tier: ModelTier::Primary,
            entities: entities(entity_count),
            relations,
            tech_terms: tech_terms.iter().map(|t| t.to_string()).collect(),
            dates: vec![],
            raw_char_length: 0,
        }
    }

    #[test]
    fn test_signals_stay_in_unit_range() {
        let c = candidate(40, relations(&["a", "b"], &[1.0; 30]), &["x", "y", "z"]);
        let s = score(&c, "short", &ModeConfig::default());
        for value in [
            s.signals.entity_density,
            s.signals.evidence_coverage,
            s.signals.confidence,
            s.signals.relation_entity_ratio,
            s.signals.relation_type_diversity,
            s.signals.tech_term_score,
            s.combined,
        ] {
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_empty_candidate_scores_zero() {
        let s = score(&candidate(0, vec![], &[]), &"x".repeat(2000), &ModeConfig::default());
        assert_eq!(s.signals.entity_density, 0.0);
        assert_eq!(s.signals.confidence, 0.0);
        assert_eq!(s.signals.relation_entity_ratio, 0.0);
        // No asserted relations: coverage is 0 / max(0, 1).
        assert_eq!(s.signals.evidence_coverage, 0.0);
        assert_eq!(s.combined, 0.0);
    }

    #[test]
    fn test_entity_density_is_proportional() {
        let targets = ScoringTargets::default();
        // 5 entities over 2000 chars = 2.5 per thousand = half the target.
        assert!((entity_density(&candidate(5, vec![], &[]), 2000, &targets) - 0.5).abs() < 1e-12);
        assert_eq!(entity_density(&candidate(50, vec![], &[]), 2000, &targets), 1.0);
    }

    #[test]
    fn test_evidence_coverage_counts_asserted_only() {
        let mut rels = relations(&["uses"], &[0.5, 0.5, 0.5, 0.5]);
        rels[1].evidence.clear();
        rels[2].kind = RelationKind::Hypothesis;
        rels[2].evidence.clear();
        let c = candidate(2, rels, &[]);
        assert!((evidence_coverage(&c) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_penalty() {
        let targets = ScoringTargets::default();
        let flat = candidate(2, relations(&["a"], &[0.88, 0.92, 0.88, 0.92]), &[]);
        let spread = candidate(2, relations(&["a"], &[1.0, 1.0, 1.0, 1.0, 0.5]), &[]);

        let flat_score = confidence_signal(&flat, &targets);
        let spread_score = confidence_signal(&spread, &targets);

        assert!((flat_score - 0.9 * 0.7 / 0.85).abs() < 1e-9);
        assert_eq!(spread_score, 1.0);
        assert!(flat_score < spread_score);
    }

    #[test]
    fn test_flat_but_moderate_confidence_is_not_penalised() {
        let targets = ScoringTargets::default();
        let c = candidate(2, relations(&["a"], &[0.7, 0.7, 0.7]), &[]);
        assert!((confidence_signal(&c, &targets) - 0.7 / 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_diversity_excludes_catch_all_and_is_monotonic() {
        let targets = ScoringTargets::default();
        let pool = ["uses", "acquired", "funds", "depends_on", "competes_with", "located_in", "founded"];
        let mut previous = -1.0;
        for n in 1..=pool.len() {
            let c = candidate(12, relations(&pool[..n], &[0.5; 8]), &[]);
            let d = relation_type_diversity(&c, &targets);
            assert!(d >= previous);
            previous = d;
        }
        assert_eq!(previous, 1.0);

        let c = candidate(12, relations(&["mentions", "Mentions", "uses"], &[0.5; 6]), &[]);
        assert!((relation_type_diversity(&c, &targets) - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_tech_terms_are_deduplicated() {
        let targets = ScoringTargets::default();
        let c = candidate(1, vec![], &["Tokio", "tokio ", "TOKIO"]);
        assert_eq!(tech_term_score(&c, &targets), 0.5);
    }

    #[test]
    fn test_weights_are_snapshotted() {
        let mut config = ModeConfig::default();
        config.weights.density = 0.25;
        config.weights.diversity = 0.15;
        let s = score(&candidate(1, vec![], &[]), "abc", &config);
        assert_eq!(s.weights, config.weights);
    }

    #[test]
    fn test_score_is_idempotent() {
        let c = candidate(6, relations(&["a", "b", "c"], &[0.91, 0.42, 0.77]), &["x"]);
        let config = ModeConfig::default();
        let text = "t".repeat(1500);
        assert_eq!(score(&c, &text, &config), score(&c, &text, &config));
    }
}
