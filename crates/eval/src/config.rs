use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Every tunable of one pipeline run. Loaded once, passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModeConfig {
    pub mode: RunMode,
    pub gates: GateThresholds,
    pub scoring: ScoringTargets,
    pub weights: ScoringWeights,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum RunMode {
    /// Primary only; gates and score are recorded but never route.
    Single,
    /// Primary and understudy both run; primary stays canonical.
    Shadow { concurrent: bool },
    /// Primary first, understudy only when gates fail or the score is low.
    Escalation { escalation_threshold: f64 },
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Shadow { .. } => "shadow",
            Self::Escalation { .. } => "escalation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GateThresholds {
    pub evidence_fidelity_min: f64,
    pub orphan_tolerance_max: f64,
    pub high_confidence_threshold: f64,
    /// Documents shorter than this (chars) are trivial for the zero-value gate.
    pub short_char_length_max: usize,
    /// Documents at or above this length (chars) land in the large bucket.
    pub large_char_length_min: usize,
    /// Entity count above which zero relations counts as empty output.
    pub relation_entity_floor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoringTargets {
    /// Entities per 1000 chars.
    pub density_target: f64,
    pub confidence_target: f64,
    pub variance_floor: f64,
    /// Mean confidence above which a flat distribution is penalised.
    pub flat_confidence_mean_min: f64,
    pub flat_confidence_penalty: f64,
    pub ratio_target: f64,
    pub diversity_target: f64,
    pub tech_term_target: f64,
    /// Relation type excluded from the diversity signal.
    pub catch_all_relation_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoringWeights {
    pub density: f64,
    pub evidence_coverage: f64,
    pub confidence: f64,
    pub ratio: f64,
    pub diversity: f64,
    pub tech_terms: f64,
}

impl ScoringWeights {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("density", self.density),
            ("evidence_coverage", self.evidence_coverage),
            ("confidence", self.confidence),
            ("ratio", self.ratio),
            ("diversity", self.diversity),
            ("tech_terms", self.tech_terms),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.named().iter().map(|(_, w)| w).sum()
    }
}

/// Thresholds copied into every decision so audit records stand alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdsSnapshot {
    pub mode: String,
    pub escalation_threshold: Option<f64>,
    pub gates: GateThresholds,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse mode config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("weight '{name}' = {value} is outside [0, 1]")]
    WeightOutOfRange { name: &'static str, value: f64 },

    #[error("scoring weights sum to {0}, expected 1.0")]
    WeightSum(f64),

    #[error("'{name}' = {value} must be a positive finite number")]
    NonPositive { name: &'static str, value: f64 },

    #[error("'{name}' = {value} is outside [0, 1]")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("large_char_length_min ({large}) must exceed short_char_length_max ({short})")]
    BucketOrder { short: usize, large: usize },

    #[error("catch_all_relation_type must not be blank")]
    BlankCatchAll,
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl Default for ModeConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            evidence_fidelity_min: 0.70,
            orphan_tolerance_max: 0.0,
            high_confidence_threshold: 0.8,
            short_char_length_max: 500,
            large_char_length_min: 5000,
            relation_entity_floor: 2,
        }
    }
}

impl Default for ScoringTargets {
    fn default() -> Self {
        Self {
            density_target: 5.0,
            confidence_target: 0.85,
            variance_floor: 0.05,
            flat_confidence_mean_min: 0.8,
            flat_confidence_penalty: 0.7,
            ratio_target: 0.5,
            diversity_target: 6.0,
            tech_term_target: 2.0,
            catch_all_relation_type: "mentions".to_string(),
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            density: 0.15,
            evidence_coverage: 0.15,
            confidence: 0.10,
            ratio: 0.20,
            diversity: 0.25,
            tech_terms: 0.15,
        }
    }
}

impl ModeConfig {
    /// Escalation mode with the calibrated defaults.
    pub fn production() -> Self {
        Self {
            mode: RunMode::Escalation {
                escalation_threshold: 0.60,
            },
            gates: GateThresholds::default(),
            scoring: ScoringTargets::default(),
            weights: ScoringWeights::default(),
        }
    }

    /// Primary-only baseline for cost/quality measurement.
    pub fn single_baseline() -> Self {
        Self {
            mode: RunMode::Single,
            ..Self::production()
        }
    }

    /// Both tiers on every document, for threshold retuning.
    pub fn shadow_calibration() -> Self {
        Self {
            mode: RunMode::Shadow { concurrent: true },
            ..Self::production()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mode config: {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("Invalid mode config: {}", path.display()))
    }

    pub fn escalation_threshold(&self) -> Option<f64> {
        match self.mode {
            RunMode::Escalation { escalation_threshold } => Some(escalation_threshold),
            _ => None,
        }
    }

    pub fn thresholds_snapshot(&self) -> ThresholdsSnapshot {
        ThresholdsSnapshot {
            mode: self.mode.name().to_string(),
            escalation_threshold: self.escalation_threshold(),
            gates: self.gates.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.weights.named() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightOutOfRange { name, value });
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }

        let s = &self.scoring;
        for (name, value) in [
            ("density_target", s.density_target),
            ("confidence_target", s.confidence_target),
            ("ratio_target", s.ratio_target),
            ("diversity_target", s.diversity_target),
            ("tech_term_target", s.tech_term_target),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if s.catch_all_relation_type.trim().is_empty() {
            return Err(ConfigError::BlankCatchAll);
        }

        let g = &self.gates;
        let mut unit = vec![
            ("evidence_fidelity_min", g.evidence_fidelity_min),
            ("orphan_tolerance_max", g.orphan_tolerance_max),
            ("high_confidence_threshold", g.high_confidence_threshold),
            ("variance_floor", s.variance_floor),
            ("flat_confidence_mean_min", s.flat_confidence_mean_min),
            ("flat_confidence_penalty", s.flat_confidence_penalty),
        ];
        if let Some(threshold) = self.escalation_threshold() {
            unit.push(("escalation_threshold", threshold));
        }
        for (name, value) in unit {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        if g.large_char_length_min <= g.short_char_length_max {
            return Err(ConfigError::BucketOrder {
                short: g.short_char_length_max,
                large: g.large_char_length_min,
            });
        }

        Ok(())
    }
}
