pub mod config;
pub mod engine;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod tracker;

pub use config::{AuditConfig, ConcurrencyConfig, CostRates, ModelsConfig, PipelineConfig, RetryConfig, UsageConfig};
pub use engine::{DecisionEngine, DocumentResult, DocumentStatus, EscalationDecision, Outcome, SCHEMA_INVALID};
pub use metrics::{Metrics, MetricsSnapshot};
pub use pipeline::{Pipeline, RunSummary};
pub use report::{AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink, ReportEmitter, RunRecord, Stage};
pub use retry::RetryPolicy;
pub use tracker::{StageUsage, TokenTracker, UsageSummary, UsageTotals};

use std::sync::Arc;
use std::time::Duration;

use extract::{OllamaClient, TieredExtractor};

/// Ollama-backed invoker for both tiers as described by `config.models`.
pub fn ollama_invoker(config: &PipelineConfig) -> Arc<TieredExtractor> {
    let timeout: Duration = config.request_timeout();
    let models = &config.models;
    Arc::new(TieredExtractor::new(
        OllamaClient::new(models.base_url.clone(), models.primary_model.clone(), timeout),
        OllamaClient::new(models.base_url.clone(), models.understudy_model.clone(), timeout),
    ))
}
