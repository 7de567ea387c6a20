//! Gemini client behind the `Transport` trait.
//!
//! Uses generateContent for one-shot calls and streamGenerateContent (SSE) for
//! streaming. Calls are instrumented and log model name, latency and response
//! sizes, never contents or the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Speaker, Turn};
use crate::error::TransportError;
use crate::transport::{ChunkReceiver, Transport};
use crate::util::trunc_for_log;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const STREAM_BUFFER: usize = 64;
/// The key goes in a header so it never shows up in request URLs or reqwest errors.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiTransport {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl GeminiTransport {
  /// Construct the client if we find GEMINI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
    let timeout = std::env::var("GEMINI_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(DEFAULT_TIMEOUT_SECS);

    match Self::new(api_key, base_url, model, Duration::from_secs(timeout)) {
      Ok(t) => Some(t),
      Err(e) => {
        error!(target: "reflection_coach", error = %e, "Failed to build Gemini HTTP client");
        None
      }
    }
  }

  pub fn new(
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
  ) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model })
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  fn url(&self, method: &str) -> String {
    format!("{}/models/{}:{}", self.base_url, self.model, method)
  }

  /// POST the request and turn non-2xx answers into `TransportError::Http`.
  async fn post(
    &self,
    method: &str,
    query: &[(&str, &str)],
    req: &GeminiRequest,
  ) -> Result<reqwest::Response, TransportError> {
    let res = self
      .client
      .post(self.url(method))
      .query(query)
      .header(API_KEY_HEADER, &self.api_key)
      .header(USER_AGENT, "reflection-coach/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_gemini_error(&body).unwrap_or(body);
      return Err(TransportError::Http { status: status.as_u16(), message });
    }
    Ok(res)
  }

  #[instrument(level = "info", skip(self, req), fields(model = %self.model, turns = req.contents.len()))]
  async fn complete(&self, req: GeminiRequest) -> Result<String, TransportError> {
    let start = Instant::now();
    let res = self.post("generateContent", &[], &req).await?;
    let body: GeminiResponse = res.json().await?;

    if let Some(err) = body.error {
      return Err(TransportError::Decode(err.message));
    }
    if let Some(usage) = &body.usage_metadata {
      info!(
        prompt_tokens = ?usage.prompt_token_count,
        candidates_tokens = ?usage.candidates_token_count,
        total_tokens = ?usage.total_token_count,
        "Gemini usage"
      );
    }

    let text = body.text();
    if text.is_empty() {
      warn!(finish_reason = ?body.finish_reason(), "Gemini returned no text");
    }
    info!(elapsed = ?start.elapsed(), text_len = text.len(), "Gemini completion received");
    Ok(text)
  }
}

#[async_trait]
impl Transport for GeminiTransport {
  fn name(&self) -> &str {
    "gemini"
  }

  async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String, TransportError> {
    self.complete(GeminiRequest::new(system_instruction, Vec::new(), prompt, None)).await
  }

  #[instrument(level = "info", skip(self, system_instruction, prompt), fields(model = %self.model))]
  async fn generate_stream(
    &self,
    system_instruction: &str,
    prompt: &str,
  ) -> Result<ChunkReceiver, TransportError> {
    let req = GeminiRequest::new(system_instruction, Vec::new(), prompt, None);
    let res = self.post("streamGenerateContent", &[("alt", "sse")], &req).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(forward_sse(res, tx));
    Ok(rx)
  }

  async fn generate_with_history(
    &self,
    system_instruction: &str,
    history: &[Turn],
    message: &str,
  ) -> Result<String, TransportError> {
    let contents = history.iter().map(GeminiContent::from_turn).collect();
    self.complete(GeminiRequest::new(system_instruction, contents, message, None)).await
  }

  fn supports_structured_output(&self) -> bool {
    true
  }

  async fn generate_structured(
    &self,
    system_instruction: &str,
    prompt: &str,
  ) -> Result<String, TransportError> {
    let config = GenerationConfig {
      response_mime_type: Some("application/json".into()),
      response_schema: Some(evaluation_schema()),
    };
    self.complete(GeminiRequest::new(system_instruction, Vec::new(), prompt, Some(config))).await
  }
}

/// Read the SSE body line by line and forward each text part as a chunk.
async fn forward_sse(res: reqwest::Response, tx: mpsc::Sender<Result<String, TransportError>>) {
  let start = Instant::now();
  let mut bytes = res.bytes_stream();
  let mut buffer: Vec<u8> = Vec::new();
  let mut sent = 0usize;

  while let Some(next) = bytes.next().await {
    let chunk = match next {
      Ok(c) => c,
      Err(e) => {
        error!(target: "evaluation", error = %e, "Gemini stream read failed");
        let _ = tx.send(Err(TransportError::Stream(e.to_string()))).await;
        return;
      }
    };
    buffer.extend_from_slice(&chunk);

    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = buffer.drain(..=pos).collect();
      let line = String::from_utf8_lossy(&line);
      match sse_text(&line) {
        Some(Ok(text)) if text.is_empty() => {}
        Some(Ok(text)) => {
          sent += 1;
          if tx.send(Ok(text)).await.is_err() {
            debug!(target: "evaluation", sent, "Stream receiver dropped; closing Gemini stream");
            return;
          }
        }
        Some(Err(e)) => {
          let _ = tx.send(Err(e)).await;
          return;
        }
        None => {}
      }
    }
  }

  // A final event without a trailing newline.
  let rest = String::from_utf8_lossy(&buffer);
  match sse_text(&rest) {
    Some(Ok(text)) if !text.is_empty() => {
      sent += 1;
      let _ = tx.send(Ok(text)).await;
    }
    Some(Err(e)) => {
      let _ = tx.send(Err(e)).await;
    }
    _ => {}
  }
  info!(target: "evaluation", elapsed = ?start.elapsed(), chunks = sent, "Gemini stream finished");
}

/// Text carried by one SSE line, if it is a `data:` event with content.
fn sse_text(line: &str) -> Option<Result<String, TransportError>> {
  let data = line.trim().strip_prefix("data:")?.trim();
  if data.is_empty() || data == "[DONE]" {
    return None;
  }
  match serde_json::from_str::<GeminiResponse>(data) {
    Ok(event) => match event.error {
      Some(err) => Some(Err(TransportError::Stream(err.message))),
      None => Some(Ok(event.text())),
    },
    Err(e) => {
      warn!(target: "evaluation", error = %e, data = %trunc_for_log(data, 120), "Skipping undecodable SSE event");
      None
    }
  }
}

/// JSON schema for the structured evaluation object.
fn evaluation_schema() -> serde_json::Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "conversation_score": { "type": "INTEGER" },
      "conversation_rationale": { "type": "STRING" },
      "reflection_score": { "type": "INTEGER" },
      "reflection_rationale": { "type": "STRING" },
      "feedback": { "type": "STRING" }
    },
    "required": ["conversation_score", "conversation_rationale", "reflection_score", "reflection_rationale", "feedback"],
    "propertyOrdering": ["conversation_score", "conversation_rationale", "reflection_score", "reflection_rationale", "feedback"]
  })
}

// --- Gemini DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
  contents: Vec<GeminiContent>,
  #[serde(skip_serializing_if = "Option::is_none")]
  system_instruction: Option<SystemInstruction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
  fn new(
    system_instruction: &str,
    mut contents: Vec<GeminiContent>,
    message: &str,
    generation_config: Option<GenerationConfig>,
  ) -> Self {
    contents.push(GeminiContent { role: "user".into(), parts: vec![TextPart { text: message.into() }] });
    let system_instruction = (!system_instruction.trim().is_empty())
      .then(|| SystemInstruction { parts: vec![TextPart { text: system_instruction.into() }] });
    Self { contents, system_instruction, generation_config }
  }
}

#[derive(Serialize)]
struct GeminiContent {
  role: String,
  parts: Vec<TextPart>,
}

impl GeminiContent {
  fn from_turn(turn: &Turn) -> Self {
    let role = match turn.speaker {
      Speaker::User => "user",
      Speaker::Character => "model",
    };
    Self { role: role.into(), parts: vec![TextPart { text: turn.text.clone() }] }
  }
}

#[derive(Serialize)]
struct SystemInstruction {
  parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
  text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  response_mime_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  usage_metadata: Option<UsageMetadata>,
  #[serde(default)]
  error: Option<ErrorObj>,
}

impl GeminiResponse {
  /// Concatenated text parts of the first candidate.
  fn text(&self) -> String {
    self
      .candidates
      .first()
      .and_then(|c| c.content.as_ref())
      .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect::<String>())
      .unwrap_or_default()
  }

  fn finish_reason(&self) -> Option<&str> {
    self.candidates.first().and_then(|c| c.finish_reason.as_deref())
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
  #[serde(default)]
  content: Option<CandidateContent>,
  #[serde(default)]
  finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<PartResp>,
}

#[derive(Deserialize)]
struct PartResp {
  #[serde(default)]
  text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)]
  prompt_token_count: Option<u32>,
  #[serde(default)]
  candidates_token_count: Option<u32>,
  #[serde(default)]
  total_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorObj {
  message: String,
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: ErrorObj,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
