//! Per-document trust decision.
//!
//! The engine owns the primary/understudy state machine for one document:
//! call, parse, gate, score, route. Every model call produces exactly one
//! audit record and every document ends with one document record.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use eval::{
    AgreementStats, Evaluation, GateResult, GateSet, ModeConfig, QualityScore, RunMode, SourceText,
    ThresholdsSnapshot, compare_candidates, first_failure,
};
use extract::{Document, ExtractionCandidate, ExtractionError, ModelInvoker, ModelTier, TokenUsage, parse_candidate};

use crate::config::CostRates;
use crate::metrics::Metrics;
use crate::report::{ReportEmitter, RunRecord, Stage};
use crate::retry::RetryPolicy;
use crate::tracker::TokenTracker;

/// Pseudo-gate name used when the model output cannot be parsed.
pub const SCHEMA_INVALID: &str = "schema_invalid";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accept,
    Escalate,
    Reject,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Escalate => "escalate",
            Self::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationDecision {
    pub outcome: Outcome,
    pub triggering_gate: Option<String>,
    pub score: Option<f64>,
    pub thresholds: ThresholdsSnapshot,
    /// Fingerprint of the accepted candidate.
    pub chosen_candidate_ref: Option<String>,
}

/// Final state of one document in one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Accepted,
    /// Rejected without an understudy attempt.
    Rejected,
    /// The understudy was tried and failed too.
    EscalationFailed,
    /// A model call failed after retries. The document can be retried next run.
    Error,
    /// Cancelled by the run deadline.
    Skipped,
}

/// What the importer gets for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentResult {
    pub document_id: String,
    pub status: DocumentStatus,
    pub decision: Option<EscalationDecision>,
    /// The candidate to import. `None` unless accepted.
    pub winner: Option<ExtractionCandidate>,
    pub escalated: bool,
    pub error: Option<String>,
    pub shadow: Option<AgreementStats>,
}

impl DocumentResult {
    fn new(document_id: &str, status: DocumentStatus) -> Self {
        Self {
            document_id: document_id.to_string(),
            status,
            decision: None,
            winner: None,
            escalated: false,
            error: None,
            shadow: None,
        }
    }

    /// Processing aborted before a decision could be recorded.
    pub(crate) fn failed(document_id: &str, error: String) -> Self {
        let mut result = Self::new(document_id, DocumentStatus::Error);
        result.error = Some(error);
        result
    }

    pub fn winner_tier(&self) -> Option<ModelTier> {
        self.winner.as_ref().map(|c| c.model_tier)
    }
}

/// Everything about a model call except its parsed output.
struct CallMeta {
    tier: ModelTier,
    model_identity: String,
    usage: TokenUsage,
    duration: Duration,
}

type CallOutput = (CallMeta, Result<ExtractionCandidate, ExtractionError>);

pub struct DecisionEngine {
    invoker: Arc<dyn ModelInvoker>,
    config: ModeConfig,
    gates: GateSet,
    retry: RetryPolicy,
    tracker: Arc<TokenTracker>,
    metrics: Arc<Metrics>,
    report: ReportEmitter,
}

impl DecisionEngine {
    pub fn new(invoker: Arc<dyn ModelInvoker>, config: ModeConfig, report: ReportEmitter) -> Self {
        Self {
            invoker,
            config,
            gates: GateSet::standard(),
            retry: RetryPolicy::none(),
            tracker: Arc::new(TokenTracker::new(CostRates::default())),
            metrics: Arc::new(Metrics::new()),
            report,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<TokenTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<TokenTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id()
    }

    pub async fn process(&self, document: &Document) -> Result<DocumentResult> {
        match self.config.mode {
            RunMode::Single => self.process_single(document).await,
            RunMode::Shadow { concurrent } => self.process_shadow(document, concurrent).await,
            RunMode::Escalation { escalation_threshold } => self.process_escalation(document, escalation_threshold).await,
        }
    }

    /// Close out a document the run deadline cancelled.
    pub async fn record_skipped(&self, document_id: &str) -> Result<DocumentResult> {
        warn!(document_id, "Run deadline reached, document skipped");
        self.finish(DocumentResult::new(document_id, DocumentStatus::Skipped))
            .await
    }

    async fn process_single(&self, document: &Document) -> Result<DocumentResult> {
        let (meta, parsed) = self.call(ModelTier::Primary, document).await;
        let candidate = match parsed {
            Ok(candidate) => candidate,
            Err(e) if e.is_schema_invalid() => return self.reject_unparseable(document, &meta, &e).await,
            Err(e) => return self.fail_call(document, &meta, &e, false).await,
        };

        let source = SourceText::new(&document.text);
        let gates = self.run_gates(&candidate, &source);
        let score = eval::score(&candidate, &document.text, &self.config);
        let decision = self.decision(Outcome::Accept, None, Some(score.combined), Some(&candidate));
        self.emit_call(document, &meta, None, Some(&decision), gates, Some(score))
            .await?;

        let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Accepted);
        result.decision = Some(decision);
        result.winner = Some(candidate);
        self.finish(result).await
    }

    async fn process_shadow(&self, document: &Document, concurrent: bool) -> Result<DocumentResult> {
        let (primary, understudy) = if concurrent {
            tokio::join!(
                self.call(ModelTier::Primary, document),
                self.call(ModelTier::Understudy, document)
            )
        } else {
            let primary = self.call(ModelTier::Primary, document).await;
            let understudy = self.call(ModelTier::Understudy, document).await;
            (primary, understudy)
        };
        let (primary_meta, primary_parsed) = primary;

        let understudy = self.observe(document, understudy).await?;

        let candidate = match primary_parsed {
            Ok(candidate) => candidate,
            Err(e) if e.is_schema_invalid() => return self.reject_unparseable(document, &primary_meta, &e).await,
            Err(e) => return self.fail_call(document, &primary_meta, &e, false).await,
        };

        let evaluation = self.evaluate(&candidate, document);
        let decision = self.decision(
            Outcome::Accept,
            None,
            Some(evaluation.score.combined),
            Some(&candidate),
        );

        let agreement = understudy
            .as_ref()
            .map(|(other, other_eval)| compare_candidates(&candidate, &evaluation, other, other_eval));

        self.emit_call(
            document,
            &primary_meta,
            None,
            Some(&decision),
            evaluation.gates,
            Some(evaluation.score),
        )
        .await?;
        if let Some(agreement) = &agreement {
            info!(
                document_id = %document.document_id,
                entity_overlap = agreement.entity_overlap,
                relation_overlap = agreement.relation_overlap,
                combined_delta = agreement.combined_delta,
                "Shadow comparison"
            );
            self.report
                .emit_shadow(&document.document_id, agreement.clone())
                .await?;
        }

        let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Accepted);
        result.decision = Some(decision);
        result.winner = Some(candidate);
        result.shadow = agreement;
        self.finish(result).await
    }

    async fn process_escalation(&self, document: &Document, threshold: f64) -> Result<DocumentResult> {
        let (meta, parsed) = self.call(ModelTier::Primary, document).await;

        let trigger = match parsed {
            Err(e) if e.is_schema_invalid() => {
                let decision = self.decision(Outcome::Escalate, Some(SCHEMA_INVALID), None, None);
                self.emit_call(document, &meta, Some(&e), Some(&decision), Vec::new(), None)
                    .await?;
                Some(SCHEMA_INVALID.to_string())
            }
            Err(e) => return self.fail_call(document, &meta, &e, false).await,
            Ok(candidate) => {
                let source = SourceText::new(&document.text);
                let gates = self.run_gates(&candidate, &source);

                if let Some(failed) = first_failure(&gates) {
                    let gate = failed.name.clone();
                    let decision = self.decision(Outcome::Escalate, Some(gate.as_str()), None, None);
                    self.emit_call(document, &meta, None, Some(&decision), gates, None)
                        .await?;
                    Some(gate)
                } else {
                    let score = eval::score(&candidate, &document.text, &self.config);
                    let combined = score.combined;

                    if combined < threshold {
                        let decision = self.decision(Outcome::Escalate, None, Some(combined), None);
                        self.emit_call(document, &meta, None, Some(&decision), gates, Some(score))
                            .await?;
                        None
                    } else {
                        let decision = self.decision(Outcome::Accept, None, Some(combined), Some(&candidate));
                        self.emit_call(document, &meta, None, Some(&decision), gates, Some(score))
                            .await?;

                        let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Accepted);
                        result.decision = Some(decision);
                        result.winner = Some(candidate);
                        return self.finish(result).await;
                    }
                }
            }
        };

        self.metrics.record_escalation();
        info!(
            document_id = %document.document_id,
            gate = trigger.as_deref().unwrap_or("score"),
            "Escalating to understudy"
        );

        // Only reached once the primary candidate has been fully evaluated.
        let (meta, parsed) = self.call(ModelTier::Understudy, document).await;
        let candidate = match parsed {
            Ok(candidate) => candidate,
            Err(e) if e.is_schema_invalid() => {
                let decision = self.decision(Outcome::Reject, Some(SCHEMA_INVALID), None, None);
                self.emit_call(document, &meta, Some(&e), Some(&decision), Vec::new(), None)
                    .await?;
                let mut result = DocumentResult::new(&document.document_id, DocumentStatus::EscalationFailed);
                result.decision = Some(decision);
                result.escalated = true;
                result.error = Some(e.to_string());
                return self.finish(result).await;
            }
            Err(e) => return self.fail_call(document, &meta, &e, true).await,
        };

        // Re-gated, not re-scored.
        let source = SourceText::new(&document.text);
        let gates = self.run_gates(&candidate, &source);
        let mut result = match first_failure(&gates) {
            None => {
                let decision = self.decision(Outcome::Accept, None, None, Some(&candidate));
                let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Accepted);
                result.decision = Some(decision);
                result.winner = Some(candidate);
                result
            }
            Some(failed) => {
                let decision = self.decision(Outcome::Reject, Some(failed.name.as_str()), None, None);
                let mut result = DocumentResult::new(&document.document_id, DocumentStatus::EscalationFailed);
                result.decision = Some(decision);
                result
            }
        };
        result.escalated = true;
        self.emit_call(document, &meta, None, result.decision.as_ref(), gates, None)
            .await?;
        self.finish(result).await
    }

    /// One model call with retries on transient failures, then parsing.
    async fn call(&self, tier: ModelTier, document: &Document) -> CallOutput {
        let start = Instant::now();
        let operation = format!("{tier} extraction");
        let completion = self
            .retry
            .retry(
                &operation,
                || self.invoker.complete(tier, document),
                |e: &ExtractionError| e.is_transient(),
            )
            .await;
        let duration = start.elapsed();
        self.metrics.record_call(tier, duration);

        match completion {
            Ok(completion) => {
                self.tracker
                    .record_call(&document.document_id, tier, completion.usage);
                let parsed = parse_candidate(&document.document_id, tier, &completion.text);
                let meta = CallMeta {
                    tier,
                    model_identity: completion.model_identity,
                    usage: completion.usage,
                    duration,
                };
                (meta, parsed)
            }
            Err(e) => {
                let meta = CallMeta {
                    tier,
                    model_identity: self.invoker.model_identity(tier),
                    usage: TokenUsage::default(),
                    duration,
                };
                (meta, Err(e))
            }
        }
    }

    fn run_gates(&self, candidate: &ExtractionCandidate, source: &SourceText) -> Vec<GateResult> {
        let gates = self.gates.evaluate(candidate, source, &self.config);
        for _ in gates.iter().filter(|g| !g.passed) {
            self.metrics.record_gate_failure();
        }
        gates
    }

    fn evaluate(&self, candidate: &ExtractionCandidate, document: &Document) -> Evaluation {
        let source = SourceText::new(&document.text);
        Evaluation {
            gates: self.run_gates(candidate, &source),
            score: eval::score(candidate, &document.text, &self.config),
        }
    }

    /// Audit a shadow understudy call. It never affects the outcome.
    async fn observe(&self, document: &Document, output: CallOutput) -> Result<Option<(ExtractionCandidate, Evaluation)>> {
        let (meta, parsed) = output;
        match parsed {
            Ok(candidate) => {
                let evaluation = self.evaluate(&candidate, document);
                self.emit_call(
                    document,
                    &meta,
                    None,
                    None,
                    evaluation.gates.clone(),
                    Some(evaluation.score.clone()),
                )
                .await?;
                Ok(Some((candidate, evaluation)))
            }
            Err(e) => {
                warn!(document_id = %document.document_id, error = %e, "Shadow understudy produced no candidate");
                self.emit_call(document, &meta, Some(&e), None, Vec::new(), None)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn reject_unparseable(&self, document: &Document, meta: &CallMeta, e: &ExtractionError) -> Result<DocumentResult> {
        let decision = self.decision(Outcome::Reject, Some(SCHEMA_INVALID), None, None);
        self.emit_call(document, meta, Some(e), Some(&decision), Vec::new(), None)
            .await?;

        let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Rejected);
        result.decision = Some(decision);
        result.error = Some(e.to_string());
        self.finish(result).await
    }

    /// Retries are exhausted: no gate/score cycle, stage=error.
    async fn fail_call(
        &self,
        document: &Document,
        meta: &CallMeta,
        e: &ExtractionError,
        escalated: bool,
    ) -> Result<DocumentResult> {
        error!(
            document_id = %document.document_id,
            tier = %meta.tier,
            error = %e,
            "Model call failed"
        );
        self.emit_call(document, meta, Some(e), None, Vec::new(), None)
            .await?;

        let mut result = DocumentResult::new(&document.document_id, DocumentStatus::Error);
        result.escalated = escalated;
        result.error = Some(e.to_string());
        self.finish(result).await
    }

    fn decision(
        &self,
        outcome: Outcome,
        triggering_gate: Option<&str>,
        score: Option<f64>,
        chosen: Option<&ExtractionCandidate>,
    ) -> EscalationDecision {
        EscalationDecision {
            outcome,
            triggering_gate: triggering_gate.map(str::to_string),
            score,
            thresholds: self.config.thresholds_snapshot(),
            chosen_candidate_ref: chosen.map(ExtractionCandidate::fingerprint),
        }
    }

    async fn emit_call(
        &self,
        document: &Document,
        meta: &CallMeta,
        error: Option<&ExtractionError>,
        decision: Option<&EscalationDecision>,
        gates: Vec<GateResult>,
        score: Option<QualityScore>,
    ) -> Result<()> {
        let stage = match error {
            Some(e) if !e.is_schema_invalid() => Stage::Error,
            _ => Stage::from(meta.tier),
        };
        let run = RunRecord {
            run_id: self.report.run_id(),
            record_id: Uuid::new_v4(),
            document_id: document.document_id.clone(),
            stage,
            model_tier: meta.tier,
            model_identity: meta.model_identity.clone(),
            tokens_in: meta.usage.prompt_tokens,
            tokens_out: meta.usage.completion_tokens,
            duration_ms: meta.duration.as_millis() as u64,
            timestamp: Utc::now(),
            decision: decision.cloned(),
            error: error.map(|e| e.to_string()),
        };
        self.report.emit_call(run, gates, score).await
    }

    async fn finish(&self, result: DocumentResult) -> Result<DocumentResult> {
        let outcome = result
            .decision
            .as_ref()
            .map(|d| d.outcome.as_str())
            .unwrap_or("none");
        info!(
            document_id = %result.document_id,
            status = ?result.status,
            outcome,
            winner = ?result.winner_tier(),
            escalated = result.escalated,
            "Document decided"
        );

        self.metrics
            .record_document(result.status, result.winner_tier());
        self.report
            .emit_document(
                &result.document_id,
                result.status,
                result.decision.clone(),
                self.tracker.summary_for_document(&result.document_id),
            )
            .await?;
        Ok(result)
    }
}
