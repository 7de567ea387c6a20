//! The language-model transport seam.
//!
//! The evaluator and the persona fan-out only see this trait; the concrete
//! client (Gemini, or the offline stand-in) is constructed in `state.rs` and
//! passed in. Tests plug in scripted doubles.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Speaker, Turn};
use crate::error::TransportError;

/// Receiving half of a streamed completion: text increments in arrival order.
pub type ChunkReceiver = mpsc::Receiver<Result<String, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
  /// Human-readable backend name (for logs and the health endpoint).
  fn name(&self) -> &str;

  /// One-shot generation.
  async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String, TransportError>;

  /// Streaming generation. The default wraps `generate` into a single chunk.
  async fn generate_stream(
    &self,
    system_instruction: &str,
    prompt: &str,
  ) -> Result<ChunkReceiver, TransportError> {
    let text = self.generate(system_instruction, prompt).await?;
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.send(Ok(text)).await;
    Ok(rx)
  }

  /// Multi-turn generation. The default flattens the history into the prompt.
  async fn generate_with_history(
    &self,
    system_instruction: &str,
    history: &[Turn],
    message: &str,
  ) -> Result<String, TransportError> {
    let mut prompt = String::new();
    for turn in history {
      let who = match turn.speaker {
        Speaker::User => "user",
        Speaker::Character => "model",
      };
      prompt.push_str(&format!("{}: {}\n", who, turn.text));
    }
    prompt.push_str(message);
    self.generate(system_instruction, &prompt).await
  }

  /// Whether `generate_structured` actually constrains output to JSON.
  fn supports_structured_output(&self) -> bool {
    false
  }

  /// JSON-constrained generation. The default is plain generation.
  async fn generate_structured(
    &self,
    system_instruction: &str,
    prompt: &str,
  ) -> Result<String, TransportError> {
    self.generate(system_instruction, prompt).await
  }
}

/// Stand-in used when no API key is configured: every call fails.
pub struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
  fn name(&self) -> &str {
    "offline"
  }

  async fn generate(&self, _system_instruction: &str, _prompt: &str) -> Result<String, TransportError> {
    Err(TransportError::NotConfigured("set GEMINI_API_KEY to enable evaluations".into()))
  }
}
