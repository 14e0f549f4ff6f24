use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use extract::{ModelTier, TokenUsage};

use crate::config::CostRates;

pub const DEFAULT_MAX_DOCUMENTS: usize = 10_000;

/// Token accounting across concurrent documents.
///
/// Observes calls only; nothing here feeds back into trust decisions.
/// Per-document entries are bounded by `max_documents`; the process-wide
/// counters keep counting after an entry is evicted.
pub struct TokenTracker {
    documents: DashMap<String, DocumentUsage>,
    max_documents: usize,
    documents_seen: AtomicUsize,
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    rates: CostRates,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl StageUsage {
    fn add(&mut self, usage: TokenUsage) {
        self.calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DocumentUsage {
    primary: StageUsage,
    understudy: StageUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub document_id: String,
    pub primary: StageUsage,
    pub understudy: StageUsage,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct UsageTotals {
    pub documents: usize,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenTracker {
    pub fn new(rates: CostRates) -> Self {
        Self {
            documents: DashMap::new(),
            max_documents: DEFAULT_MAX_DOCUMENTS,
            documents_seen: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            rates,
        }
    }

    pub fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents.max(1);
        self
    }

    pub fn record_call(&self, document_id: &str, stage: ModelTier, usage: TokenUsage) {
        if self.documents.len() >= self.max_documents && !self.documents.contains_key(document_id) {
            self.evict();
        }
        {
            let mut created = false;
            let mut entry = self.documents.entry(document_id.to_string()).or_insert_with(|| {
                created = true;
                DocumentUsage::default()
            });
            if created {
                self.documents_seen.fetch_add(1, Ordering::Relaxed);
            }
            match stage {
                ModelTier::Primary => entry.primary.add(usage),
                ModelTier::Understudy => entry.understudy.add(usage),
            }
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    pub fn summary_for_document(&self, document_id: &str) -> Option<UsageSummary> {
        let usage = *self.documents.get(document_id)?;
        let cost = |stage: &StageUsage, tier| stage.total_tokens as f64 / 1000.0 * self.rates.per_1k(tier);

        Some(UsageSummary {
            document_id: document_id.to_string(),
            primary: usage.primary,
            understudy: usage.understudy,
            prompt_tokens: usage.primary.prompt_tokens + usage.understudy.prompt_tokens,
            completion_tokens: usage.primary.completion_tokens + usage.understudy.completion_tokens,
            total_tokens: usage.primary.total_tokens + usage.understudy.total_tokens,
            estimated_cost: cost(&usage.primary, ModelTier::Primary) + cost(&usage.understudy, ModelTier::Understudy),
        })
    }

    /// Usage of just the given documents, each counted once.
    pub fn usage_for<'a, I>(&self, document_ids: I) -> UsageTotals
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: HashSet<&str> = document_ids.into_iter().collect();
        unique
            .into_iter()
            .filter_map(|id| self.summary_for_document(id))
            .fold(UsageTotals::default(), |mut totals, summary| {
                totals.documents += 1;
                totals.calls += summary.primary.calls + summary.understudy.calls;
                totals.prompt_tokens += summary.prompt_tokens;
                totals.completion_tokens += summary.completion_tokens;
                totals.total_tokens += summary.total_tokens;
                totals
            })
    }

    /// Process-wide counters since the tracker was created.
    pub fn totals(&self) -> UsageTotals {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        UsageTotals {
            documents: self.documents_seen.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn tracked_documents(&self) -> usize {
        self.documents.len()
    }

    // Drop a quarter of the entries when full.
    fn evict(&self) {
        let to_remove: Vec<String> = self
            .documents
            .iter()
            .take((self.max_documents / 4).max(1))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &to_remove {
            self.documents.remove(key);
        }
        debug!(evicted = to_remove.len(), "Usage entries evicted");
    }
}
