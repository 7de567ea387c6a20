//! Error types for the transport seam and the evaluation flow.

use thiserror::Error;

/// Failure of a call to the language-model transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("AI service is not configured: {0}")]
  NotConfigured(String),

  #[error("network error: {0}")]
  Network(String),

  #[error("model API returned HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("could not decode model response: {0}")]
  Decode(String),

  #[error("stream interrupted: {0}")]
  Stream(String),
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    let e = e.without_url();
    if e.is_decode() {
      TransportError::Decode(e.to_string())
    } else {
      TransportError::Network(e.to_string())
    }
  }
}

/// Failure of one evaluation call. The evaluator never retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
  #[error("evaluation transport failed: {0}")]
  Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn evaluation_error_carries_transport_message() {
    let err: EvaluationError = TransportError::Http { status: 429, message: "quota exceeded".into() }.into();
    let text = err.to_string();
    assert!(text.contains("HTTP 429"));
    assert!(text.contains("quota exceeded"));
  }
}
