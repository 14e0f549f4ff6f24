use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which model tier produced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Primary,
    Understudy,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Understudy => write!(f, "understudy"),
        }
    }
}

/// Epistemic tier of a relation. Only `Asserted` relations owe evidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    #[default]
    Asserted,
    Inferred,
    Hypothesis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text_ref: Option<String>,
}

impl Evidence {
    pub fn new(snippet: impl Into<String>) -> Self {
        Self {
            snippet: snippet.into(),
            source_text_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub source: String,
    pub target: String,
    #[serde(rename = "relation")]
    pub rel_type: String,
    #[serde(default)]
    pub kind: RelationKind,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Relation {
    pub fn is_asserted(&self) -> bool {
        self.kind == RelationKind::Asserted
    }

    /// Evidence entries whose snippet is not blank.
    pub fn snippets(&self) -> impl Iterator<Item = &str> {
        self.evidence
            .iter()
            .map(|e| e.snippet.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn has_evidence(&self) -> bool {
        self.snippets().next().is_some()
    }

    /// Stable identifier used in diagnostics: position plus the triple.
    pub fn label(&self, index: usize) -> String {
        format!(
            "R{} ({} -[{}]-> {})",
            index + 1,
            self.source,
            self.rel_type,
            self.target
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateSpan {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// One model's extraction for one document. Never mutated after parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionCandidate {
    pub document_id: String,
    pub model_tier: ModelTier,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub tech_terms: Vec<String>,
    pub dates: Vec<DateSpan>,
    pub raw_char_length: usize,
}

impl ExtractionCandidate {
    pub fn asserted_relations(&self) -> impl Iterator<Item = (usize, &Relation)> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_asserted())
    }

    /// Content hash of the candidate, used as `chosen_candidate_ref`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document_id.as_bytes());
        hasher.update(self.model_tier.to_string().as_bytes());
        // Serializing plain data structs cannot fail; an empty body still hashes.
        let body = serde_json::to_vec(&(&self.entities, &self.relations, &self.tech_terms, &self.dates))
            .unwrap_or_default();
        hasher.update(&body);
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// A cleaned document handed to the engine by the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub text: String,
}

impl Document {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
        }
    }
}

/// Token accounting for one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
