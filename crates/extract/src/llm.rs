use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ExtractionError;
use crate::schema::TokenUsage;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

/// Text returned by one model call plus what it cost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub model_identity: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        // Builder only fails when the TLS backend cannot initialise; fall back
        // to the default client, which then fails per request.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            model,
            timeout,
            client,
        }
    }

    pub fn model_identity(&self) -> String {
        format!("ollama:{}", self.model)
    }

    pub async fn generate(&self, prompt: &str) -> Result<Completion, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(), // Force JSON output
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            return Err(ExtractionError::ModelCall(format!(
                "Ollama request failed: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaResponse = response.json().await.map_err(|e| self.classify(e))?;

        debug!(
            model = %self.model,
            prompt_tokens = ollama_response.prompt_eval_count,
            completion_tokens = ollama_response.eval_count,
            "Ollama generation finished"
        );

        Ok(Completion {
            text: ollama_response.response,
            usage: TokenUsage::new(ollama_response.prompt_eval_count, ollama_response.eval_count),
            model_identity: self.model_identity(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> ExtractionError {
        if err.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else {
            ExtractionError::from(err)
        }
    }
}
