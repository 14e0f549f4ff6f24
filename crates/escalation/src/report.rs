//! Append-only audit trail for calibration and debugging.
//!
//! One record per model call, one per shadow comparison and one per finished
//! document, all keyed by the run identifier. Sinks only ever append.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use eval::{AgreementStats, GateResult, QualityScore};
use extract::ModelTier;

use crate::engine::{DocumentStatus, EscalationDecision};
use crate::tracker::UsageSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Primary,
    Understudy,
    /// The model call itself failed after retries.
    Error,
}

impl From<ModelTier> for Stage {
    fn from(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Primary => Self::Primary,
            ModelTier::Understudy => Self::Understudy,
        }
    }
}

/// One model invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub record_id: Uuid,
    pub document_id: String,
    pub stage: Stage,
    pub model_tier: ModelTier,
    pub model_identity: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub decision: Option<EscalationDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Call {
        run: RunRecord,
        gates: Vec<GateResult>,
        score: Option<QualityScore>,
    },
    Shadow {
        run_id: Uuid,
        document_id: String,
        timestamp: DateTime<Utc>,
        agreement: AgreementStats,
    },
    Document {
        run_id: Uuid,
        document_id: String,
        timestamp: DateTime<Utc>,
        status: DocumentStatus,
        decision: Option<EscalationDecision>,
        usage: Option<UsageSummary>,
    },
}

impl AuditRecord {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Call { run, .. } => &run.document_id,
            Self::Shadow { document_id, .. } | Self::Document { document_id, .. } => document_id,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// One `<run_id>.jsonl` file per run, opened in append mode.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonlAuditSink {
    pub async fn open(dir: &Path, run_id: Uuid) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create audit dir: {}", dir.display()))?;
        let path = dir.join(format!("{run_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize audit record")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

/// In-process sink for tests and the HTTP service.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn records_for(&self, document_id: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.document_id() == document_id)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Builds audit records for one run and hands them to the sink.
#[derive(Clone)]
pub struct ReportEmitter {
    run_id: Uuid,
    sink: Arc<dyn AuditSink>,
}

impl ReportEmitter {
    pub fn new(run_id: Uuid, sink: Arc<dyn AuditSink>) -> Self {
        Self { run_id, sink }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn emit_call(&self, run: RunRecord, gates: Vec<GateResult>, score: Option<QualityScore>) -> Result<()> {
        for gate in gates.iter().filter(|g| !g.passed) {
            warn!(
                document_id = %run.document_id,
                tier = %run.model_tier,
                gate = %gate.name,
                measured = gate.measured_value,
                threshold = gate.threshold,
                examples = ?gate.failing_examples,
                "Gate failed"
            );
        }
        debug!(document_id = %run.document_id, stage = ?run.stage, "Recording model call");
        self.sink.append(&AuditRecord::Call { run, gates, score }).await
    }

    pub async fn emit_shadow(&self, document_id: &str, agreement: AgreementStats) -> Result<()> {
        self.sink
            .append(&AuditRecord::Shadow {
                run_id: self.run_id,
                document_id: document_id.to_string(),
                timestamp: Utc::now(),
                agreement,
            })
            .await
    }

    pub async fn emit_document(
        &self,
        document_id: &str,
        status: DocumentStatus,
        decision: Option<EscalationDecision>,
        usage: Option<UsageSummary>,
    ) -> Result<()> {
        self.sink
            .append(&AuditRecord::Document {
                run_id: self.run_id,
                document_id: document_id.to_string(),
                timestamp: Utc::now(),
                status,
                decision,
                usage,
            })
            .await
    }
}
