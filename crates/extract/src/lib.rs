pub mod candidate;
pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use candidate::{parse_candidate, validate_shape};
pub use error::ExtractionError;
pub use llm::{Completion, OllamaClient};
pub use normalizer::{EntityIndex, normalize_name, normalize_text};
pub use schema::{
    DateSpan, Document, Entity, Evidence, ExtractionCandidate, ModelTier, Relation, RelationKind, TokenUsage,
};

use async_trait::async_trait;

/// Model-call capability: one extraction completion per (tier, document).
///
/// Implementations only talk to the provider. Parsing and shape validation
/// happen in [`parse_candidate`] so tokens spent on unusable output are still
/// accounted for.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn complete(&self, tier: ModelTier, document: &Document) -> Result<Completion, ExtractionError>;

    fn model_identity(&self, tier: ModelTier) -> String;
}

/// Ollama-backed invoker with one model per tier.
pub struct TieredExtractor {
    primary: OllamaClient,
    understudy: OllamaClient,
}

impl TieredExtractor {
    pub fn new(primary: OllamaClient, understudy: OllamaClient) -> Self {
        Self { primary, understudy }
    }

    fn client(&self, tier: ModelTier) -> &OllamaClient {
        match tier {
            ModelTier::Primary => &self.primary,
            ModelTier::Understudy => &self.understudy,
        }
    }
}

#[async_trait]
impl ModelInvoker for TieredExtractor {
    async fn complete(&self, tier: ModelTier, document: &Document) -> Result<Completion, ExtractionError> {
        let prompt = prompt::build_extraction_prompt(&document.text);
        self.client(tier).generate(&prompt).await
    }

    fn model_identity(&self, tier: ModelTier) -> String {
        self.client(tier).model_identity()
    }
}
