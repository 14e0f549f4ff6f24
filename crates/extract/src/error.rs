//! Error taxonomy for model calls.
//!
//! | Variant         | Transient | Handling                              |
//! |-----------------|-----------|---------------------------------------|
//! | `ModelCall`     | yes       | retried with backoff, then stage=error |
//! | `Timeout`       | yes       | retried with backoff, then stage=error |
//! | `SchemaInvalid` | no        | automatic escalate, never scored       |

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Network or provider failure while calling the model.
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// The provider did not answer within the request timeout.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// The model answered, but the output cannot be parsed into a candidate.
    #[error("extraction output is schema-invalid: {0}")]
    SchemaInvalid(String),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ModelCall(_) | Self::Timeout(_))
    }

    pub fn is_schema_invalid(&self) -> bool {
        matches!(self, Self::SchemaInvalid(_))
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        Self::ModelCall(err.to_string())
    }
}
