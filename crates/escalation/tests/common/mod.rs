#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use escalation::{DecisionEngine, MemoryAuditSink, ReportEmitter};
use eval::ModeConfig;
use extract::{
    Completion, Document, Entity, Evidence, ExtractionCandidate, ExtractionError, ModelInvoker, ModelTier, Relation,
    RelationKind, TokenUsage,
};

pub enum Reply {
    Candidate(ExtractionCandidate),
    Raw(String),
    Transient,
    Slow(Duration, ExtractionCandidate),
}

/// Replays canned model output per (document, tier) and records every call.
#[derive(Default)]
pub struct ScriptedInvoker {
    replies: Mutex<HashMap<(String, ModelTier), VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, ModelTier)>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, document_id: &str, tier: ModelTier, replies: Vec<Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry((document_id.to_string(), tier))
            .or_default()
            .extend(replies);
        self
    }

    pub fn calls_for(&self, document_id: &str) -> Vec<ModelTier> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == document_id)
            .map(|(_, tier)| *tier)
            .collect()
    }

    fn completion(tier: ModelTier, text: String) -> Completion {
        let usage = match tier {
            ModelTier::Primary => TokenUsage::new(400, 100),
            ModelTier::Understudy => TokenUsage::new(400, 300),
        };
        Completion {
            text,
            usage,
            model_identity: format!("scripted:{tier}"),
        }
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn complete(&self, tier: ModelTier, document: &Document) -> Result<Completion, ExtractionError> {
        self.calls
            .lock()
            .unwrap()
            .push((document.document_id.clone(), tier));
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .get_mut(&(document.document_id.clone(), tier))
                .and_then(VecDeque::pop_front)
        };

        match reply {
            Some(Reply::Candidate(candidate)) => Ok(Self::completion(tier, serde_json::to_string(&candidate).unwrap())),
            Some(Reply::Raw(text)) => Ok(Self::completion(tier, text)),
            Some(Reply::Transient) => Err(ExtractionError::ModelCall("503 Service Unavailable".to_string())),
            Some(Reply::Slow(delay, candidate)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::completion(tier, serde_json::to_string(&candidate).unwrap()))
            }
            None => Err(ExtractionError::ModelCall(format!(
                "no scripted reply for {} ({tier})",
                document.document_id
            ))),
        }
    }

    fn model_identity(&self, tier: ModelTier) -> String {
        format!("scripted:{tier}")
    }
}

pub fn engine(invoker: Arc<ScriptedInvoker>, config: ModeConfig) -> (DecisionEngine, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    let report = ReportEmitter::new(Uuid::new_v4(), sink.clone());
    (DecisionEngine::new(invoker, config, report), sink)
}

// ── Fixtures ────────────────────────────────────────────────────────────────

pub fn entity(name: &str) -> Entity {
    Entity {
        name: name.to_string(),
        entity_type: "technology".to_string(),
        aliases: Vec::new(),
    }
}

/// Asserted relation whose evidence reads "<source> <relation words> <target>".
pub fn evidenced(source: &str, rel_type: &str, target: &str, confidence: f64) -> Relation {
    Relation {
        source: source.to_string(),
        target: target.to_string(),
        rel_type: rel_type.to_string(),
        kind: RelationKind::Asserted,
        confidence,
        evidence: vec![Evidence::new(format!(
            "{source} {} {target}",
            rel_type.replace('_', " ")
        ))],
    }
}

/// Asserted relation with no evidence at all.
pub fn bare(source: &str, rel_type: &str, target: &str, confidence: f64) -> Relation {
    Relation {
        evidence: Vec::new(),
        ..evidenced(source, rel_type, target, confidence)
    }
}

pub fn candidate(
    tier: ModelTier,
    entities: &[&str],
    relations: Vec<Relation>,
    tech_terms: &[&str],
) -> ExtractionCandidate {
    ExtractionCandidate {
        document_id: String::new(),
        model_tier: tier,
        entities: entities.iter().map(|n| entity(n)).collect(),
        relations,
        tech_terms: tech_terms.iter().map(|t| t.to_string()).collect(),
        dates: Vec::new(),
        raw_char_length: 0,
    }
}

/// Source text of exactly `len` chars containing every evidence snippet.
pub fn source_for(candidates: &[&ExtractionCandidate], len: usize) -> String {
    let mut text = String::from("Release notes.");
    for candidate in candidates {
        for relation in &candidate.relations {
            for evidence in &relation.evidence {
                text.push(' ');
                text.push_str(&evidence.snippet);
                text.push('.');
            }
        }
    }
    assert!(text.chars().count() < len, "fixture snippets exceed {len} chars");
    while text.chars().count() < len {
        text.push_str(" Further background on the ecosystem follows.");
    }
    text.chars().take(len).collect()
}

pub fn document(document_id: &str, candidates: &[&ExtractionCandidate], len: usize) -> Document {
    Document::new(document_id, source_for(candidates, len))
}

/// Typical cheap model: shallow type vocabulary, flat-high confidence.
pub fn scenario_a() -> ExtractionCandidate {
    let confidences = [0.88, 0.92, 0.88, 0.92, 0.88, 0.92, 0.88, 0.92, 0.90];
    let triples = [
        ("Axum", "built_on", "Hyper"),
        ("Axum", "built_on", "Tower"),
        ("Tonic", "built_on", "Hyper"),
        ("Hyper", "depends_on", "Tokio"),
        ("Tokio", "depends_on", "Mio"),
        ("Reqwest", "depends_on", "Hyper"),
        ("Tonic", "integrates_with", "Prost"),
        ("Tracing", "integrates_with", "Tokio"),
        ("Serde", "integrates_with", "Bytes"),
    ];
    let relations = triples
        .iter()
        .zip(confidences)
        .map(|((s, r, t), c)| evidenced(s, r, t, c))
        .collect();
    candidate(
        ModelTier::Primary,
        &[
            "Tokio", "Rust", "Axum", "Hyper", "Tower", "Serde", "Tracing", "Mio", "Reqwest", "Tonic", "Prost", "Bytes",
        ],
        relations,
        &["async runtime", "HTTP/2", "gRPC", "epoll", "zero-copy"],
    )
}

/// Weak cheap model: most relations asserted at high confidence without evidence.
pub fn scenario_b() -> ExtractionCandidate {
    let relations = vec![
        evidenced("Postgres", "uses", "WAL", 0.9),
        evidenced("Postgres", "uses", "MVCC", 0.9),
        bare("Citus", "uses", "Postgres", 0.9),
        bare("TimescaleDB", "uses", "Postgres", 0.9),
        bare("Postgres", "mentions", "Linux", 0.9),
        bare("Citus", "mentions", "Linux", 0.9),
        bare("TimescaleDB", "mentions", "Kubernetes", 0.9),
        bare("Postgres", "mentions", "Kubernetes", 0.9),
        bare("MVCC", "mentions", "Vacuum", 0.9),
    ];
    candidate(
        ModelTier::Primary,
        &["Postgres", "WAL", "MVCC", "Citus", "TimescaleDB", "Linux", "Kubernetes", "Vacuum"],
        relations,
        &["write-ahead log", "sharding"],
    )
}

/// Specialist-quality extraction: rich types, spread confidence, all evidenced.
pub fn scenario_c(tier: ModelTier) -> ExtractionCandidate {
    let triples = [
        ("Postgres", "implements", "MVCC"),
        ("Postgres", "persists_via", "WAL"),
        ("Citus", "extends", "Postgres"),
        ("Citus", "shards_by", "Distribution Column"),
        ("TimescaleDB", "partitions_into", "Hypertable"),
        ("Hypertable", "compresses_with", "Columnar Storage"),
        ("Vacuum", "reclaims", "Dead Tuples"),
        ("Patroni", "orchestrates", "Failover"),
        ("PgBouncer", "pools", "Connections"),
        ("Logical Replication", "feeds", "TimescaleDB"),
    ];
    let relations = triples
        .iter()
        .enumerate()
        .map(|(i, (s, r, t))| evidenced(s, r, t, if i % 2 == 0 { 0.57 } else { 0.87 }))
        .collect();
    candidate(
        tier,
        &[
            "Postgres",
            "MVCC",
            "WAL",
            "Citus",
            "Distribution Column",
            "TimescaleDB",
            "Hypertable",
            "Columnar Storage",
            "Vacuum",
            "Dead Tuples",
            "Patroni",
            "Failover",
            "PgBouncer",
            "Connections",
            "Logical Replication",
        ],
        relations,
        &[
            "write-ahead log",
            "multi-version concurrency control",
            "sharding",
            "hypertable",
            "columnar compression",
            "connection pooling",
            "logical decoding",
            "failover",
        ],
    )
}

/// Passes every gate but scores well under the escalation threshold.
pub fn shallow() -> ExtractionCandidate {
    candidate(
        ModelTier::Primary,
        &["Postgres", "WAL", "Linux"],
        vec![evidenced("Postgres", "uses", "WAL", 0.5)],
        &[],
    )
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-3
}
