pub mod config;
pub mod gates;
pub mod scorer;
pub mod shadow;

pub use config::{ConfigError, GateThresholds, ModeConfig, RunMode, ScoringTargets, ScoringWeights, ThresholdsSnapshot};
pub use gates::{Gate, GateResult, GateSet, LengthBucket, SourceText, all_passed, evaluate_gates, first_failure};
pub use scorer::{QualityScore, QualitySignals, score};
pub use shadow::{AgreementStats, compare_candidates};

use serde::{Deserialize, Serialize};
use tracing::debug;

use extract::ExtractionCandidate;

/// Gate results and quality score for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub gates: Vec<GateResult>,
    pub score: QualityScore,
}

impl Evaluation {
    pub fn gates_passed(&self) -> bool {
        all_passed(&self.gates)
    }

    pub fn first_failure(&self) -> Option<&GateResult> {
        first_failure(&self.gates)
    }
}

/// Gates then score. Both are pure functions of the inputs and `config`.
pub fn evaluate(candidate: &ExtractionCandidate, source_text: &str, config: &ModeConfig) -> Evaluation {
    let evaluation = Evaluation {
        gates: evaluate_gates(candidate, source_text, config),
        score: score(candidate, source_text, config),
    };
    debug!(
        document_id = %candidate.document_id,
        tier = %candidate.model_tier,
        gates_passed = evaluation.gates_passed(),
        combined = evaluation.score.combined,
        "Candidate evaluated"
    );
    evaluation
}
