use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use extract::ModelTier;

/// Plumbing for one pipeline run. Trust thresholds live in `eval::ModeConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub models: ModelsConfig,
    pub audit: AuditConfig,
    pub costs: CostRates,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_documents: usize,
    pub request_timeout_secs: u64,
    /// Wall-clock budget for the whole run; unfinished documents are skipped.
    pub run_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub base_url: String,
    pub primary_model: String,
    pub understudy_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Per-document usage entries kept for lookup; a quarter are evicted when full.
    pub max_tracked_documents: usize,
}

/// Price per 1000 tokens for each tier, in whatever currency the caller uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostRates {
    pub primary_per_1k_tokens: f64,
    pub understudy_per_1k_tokens: f64,
}

impl CostRates {
    pub fn per_1k(&self, tier: ModelTier) -> f64 {
        match tier {
            ModelTier::Primary => self.primary_per_1k_tokens,
            ModelTier::Understudy => self.understudy_per_1k_tokens,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            models: ModelsConfig::default(),
            audit: AuditConfig::default(),
            costs: CostRates::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
            request_timeout_secs: 120,
            run_timeout_secs: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            primary_model: "llama3".to_string(),
            understudy_model: "llama3:70b".to_string(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/audit"),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            max_tracked_documents: 10_000,
        }
    }
}

impl Default for CostRates {
    fn default() -> Self {
        // Local Ollama models cost nothing per token.
        Self {
            primary_per_1k_tokens: 0.0,
            understudy_per_1k_tokens: 0.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config: {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid pipeline config: {}", path.display()))
    }

    /// Overlay `ESCALATION_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ESCALATION_OLLAMA_URL") {
            self.models.base_url = url;
        }
        if let Some(model) = lookup("ESCALATION_PRIMARY_MODEL") {
            self.models.primary_model = model;
        }
        if let Some(model) = lookup("ESCALATION_UNDERSTUDY_MODEL") {
            self.models.understudy_model = model;
        }
        if let Some(dir) = lookup("ESCALATION_AUDIT_DIR") {
            self.audit.dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("ESCALATION_MAX_CONCURRENT") {
            self.concurrency.max_concurrent_documents = max
                .parse()
                .with_context(|| format!("ESCALATION_MAX_CONCURRENT is not a number: {max}"))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.concurrency.run_timeout_secs.map(Duration::from_secs)
    }
}
