use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info};
use uuid::Uuid;

use extract::{Document, ModelTier};

use crate::engine::{DecisionEngine, DocumentResult, DocumentStatus};
use crate::tracker::UsageTotals;

/// Document-parallel runner. Calls within one document stay sequential
/// (except shadow mode's paired calls); documents share a bounded pool.
pub struct Pipeline {
    engine: Arc<DecisionEngine>,
    max_concurrent: usize,
    run_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: String,
    pub documents: usize,
    pub accepted_primary: usize,
    pub accepted_understudy: usize,
    pub rejected: usize,
    pub escalation_failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub escalated: usize,
    pub escalation_rate: f64,
    pub usage: UsageTotals,
}

impl Pipeline {
    pub fn new(engine: Arc<DecisionEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            max_concurrent: max_concurrent.max(1),
            run_timeout: None,
        }
    }

    /// Documents still in flight when the budget runs out are marked skipped.
    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    /// Process every document; results come back in input order.
    pub async fn run(&self, documents: Vec<Document>) -> Result<Vec<DocumentResult>> {
        let total = documents.len();
        let started = Instant::now();
        let deadline = self.run_timeout.map(|budget| started + budget);
        info!(
            run_id = %self.engine.run_id(),
            documents = total,
            max_concurrent = self.max_concurrent,
            "Starting run"
        );

        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let ids: Vec<String> = documents.iter().map(|d| d.document_id.clone()).collect();
        let mut join_set: JoinSet<(usize, Option<Result<DocumentResult>>)> = JoinSet::new();

        for (index, document) in documents.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let sem = Arc::clone(&sem);

            join_set.spawn(async move {
                let work = async {
                    let _permit = sem.acquire().await.context("worker pool closed")?;
                    engine.process(&document).await
                };
                let result = match deadline {
                    Some(deadline) => timeout_at(deadline, work).await.ok(),
                    None => Some(work.await),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<DocumentResult>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.context("document task panicked")?;
            let document_id = &ids[index];
            let result = match result {
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    error!(document_id = %document_id, error = %e, "Document processing failed");
                    DocumentResult::failed(document_id, format!("{e:#}"))
                }
                None => self.engine.record_skipped(document_id).await?,
            };
            slots[index] = Some(result);
        }

        let results: Vec<DocumentResult> = slots.into_iter().flatten().collect();
        info!(
            run_id = %self.engine.run_id(),
            documents = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(results)
    }

    /// Usage covers only the documents in `results`, not earlier batches.
    pub fn summarize(&self, results: &[DocumentResult]) -> RunSummary {
        let usage = self
            .engine
            .tracker()
            .usage_for(results.iter().map(|r| r.document_id.as_str()));
        RunSummary::from_results(self.engine.run_id(), self.engine.config().mode.name(), results, usage)
    }
}

impl RunSummary {
    pub fn from_results(run_id: Uuid, mode: &str, results: &[DocumentResult], usage: UsageTotals) -> Self {
        let count = |status: DocumentStatus| results.iter().filter(|r| r.status == status).count();
        let accepted_by = |tier: ModelTier| {
            results
                .iter()
                .filter(|r| r.status == DocumentStatus::Accepted && r.winner_tier() == Some(tier))
                .count()
        };
        let escalated = results.iter().filter(|r| r.escalated).count();
        let decided = results
            .iter()
            .filter(|r| r.status != DocumentStatus::Skipped)
            .count();

        Self {
            run_id,
            mode: mode.to_string(),
            documents: results.len(),
            accepted_primary: accepted_by(ModelTier::Primary),
            accepted_understudy: accepted_by(ModelTier::Understudy),
            rejected: count(DocumentStatus::Rejected),
            escalation_failed: count(DocumentStatus::EscalationFailed),
            errors: count(DocumentStatus::Error),
            skipped: count(DocumentStatus::Skipped),
            escalated,
            escalation_rate: if decided == 0 {
                0.0
            } else {
                escalated as f64 / decided as f64
            },
            usage,
        }
    }
}
