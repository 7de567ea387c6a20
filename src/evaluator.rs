//! Evaluation requests: one transport call per evaluation, parse once, fill the fallback.
//!
//! Flow per call: Requesting → Parsing → (Fallback) → Done, or Failed when the
//! transport errors. No retries and no timeout here; the transport and the
//! caller own those concerns. Streaming surfaces partial text as it arrives but
//! parses only the fully accumulated completion.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{EvaluationSettings, Prompts};
use crate::domain::{EvaluationRequest, ParsedEvaluation};
use crate::error::EvaluationError;
use crate::fallback;
use crate::parser;
use crate::prompt;
use crate::transport::Transport;
use crate::util::fill_template;

const STREAM_BUFFER: usize = 32;

/// One item of a streamed evaluation. `complete` is only set on the last item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EvaluationProgress {
  pub partial: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub complete: Option<ParsedEvaluation>,
}

#[derive(Clone)]
pub struct Evaluator {
  transport: Arc<dyn Transport>,
  prompts: Arc<Prompts>,
  settings: EvaluationSettings,
}

impl Evaluator {
  pub fn new(transport: Arc<dyn Transport>, prompts: Prompts, settings: EvaluationSettings) -> Self {
    Self { transport, prompts: Arc::new(prompts), settings }
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn prompts(&self) -> &Prompts {
    &self.prompts
  }

  fn use_structured(&self) -> bool {
    self.settings.structured_output && self.transport.supports_structured_output()
  }

  /// Run one evaluation and hand transport failures back to the caller.
  #[instrument(
    level = "info",
    skip(self, request),
    fields(
      evaluation_id = %Uuid::new_v4(),
      transport = %self.transport.name(),
      character = %request.character_label,
      turns = request.transcript.len(),
      reflection_len = request.user_reflection.len()
    )
  )]
  pub async fn request(&self, request: EvaluationRequest) -> Result<ParsedEvaluation, EvaluationError> {
    if request.transcript.is_empty() {
      warn!(target: "evaluation", "Evaluating an empty transcript");
    }

    let structured = self.use_structured();
    let built = if structured {
      prompt::build_structured(&request, &self.prompts)
    } else {
      prompt::build(&request, &self.prompts)
    };
    debug!(
      target: "evaluation",
      structured,
      system_len = built.system_instruction.len(),
      prompt_len = built.data_prompt.len(),
      "Requesting evaluation"
    );

    let start = Instant::now();
    let result = if structured {
      self.transport.generate_structured(&built.system_instruction, &built.data_prompt).await
    } else {
      self.transport.generate(&built.system_instruction, &built.data_prompt).await
    };
    let elapsed = start.elapsed();

    let raw = match result {
      Ok(raw) => raw,
      Err(e) => {
        error!(target: "evaluation", ?elapsed, error = %e, "Evaluation transport call failed");
        return Err(e.into());
      }
    };
    info!(target: "evaluation", ?elapsed, raw_len = raw.len(), "Evaluation completion received");

    Ok(finish(&raw, &self.prompts))
  }

  /// Run one evaluation; failures become a renderable error evaluation.
  pub async fn evaluate(&self, request: EvaluationRequest) -> ParsedEvaluation {
    match self.request(request).await {
      Ok(evaluation) => evaluation,
      Err(e) => error_evaluation(&self.prompts, &e),
    }
  }

  /// Streamed evaluation. Dropping the stream stops forwarding partial text.
  pub fn evaluate_stream(&self, request: EvaluationRequest) -> ReceiverStream<EvaluationProgress> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let transport = self.transport.clone();
    let prompts = self.prompts.clone();
    tokio::spawn(async move {
      run_stream(transport, prompts, request, tx).await;
    });
    ReceiverStream::new(rx)
  }
}

/// Parse the finalized completion and fill the fallback when needed.
fn finish(raw: &str, prompts: &Prompts) -> ParsedEvaluation {
  let report = parser::parse_report(raw);
  debug!(
    target: "evaluation",
    outcome = ?report.outcome,
    order = ?report.field_order,
    structured = report.structured,
    feedback_len = report.evaluation.textual_feedback.len(),
    "Completion parsed"
  );
  let mut evaluation = report.evaluation;
  if fallback::apply(&mut evaluation, prompts) {
    info!(target: "evaluation", outcome = ?report.outcome, "No usable free text; composed fallback feedback");
  }
  evaluation
}

/// The evaluation shown when the transport failed: zero scores and error text.
pub fn error_evaluation(prompts: &Prompts, err: &EvaluationError) -> ParsedEvaluation {
  debug!(target: "evaluation", error = %err, "Converting evaluation error into error evaluation");
  ParsedEvaluation {
    textual_feedback: fill_template(
      &prompts.error_feedback_template,
      &[("error", prompts.evaluation_error_detail.as_str())],
    ),
    conversation_score: Some(0),
    conversation_rationale: Some(prompts.evaluation_error.clone()),
    reflection_score: Some(0),
    reflection_rationale: Some(prompts.evaluation_error.clone()),
  }
}

async fn send_failure(tx: &mpsc::Sender<EvaluationProgress>, prompts: &Prompts, err: EvaluationError) {
  error!(target: "evaluation", error = %err, "Streaming evaluation failed");
  let evaluation = error_evaluation(prompts, &err);
  let _ = tx
    .send(EvaluationProgress { partial: evaluation.textual_feedback.clone(), complete: Some(evaluation) })
    .await;
}

#[instrument(
  level = "info",
  skip_all,
  fields(
    evaluation_id = %Uuid::new_v4(),
    transport = %transport.name(),
    character = %request.character_label,
    turns = request.transcript.len()
  )
)]
async fn run_stream(
  transport: Arc<dyn Transport>,
  prompts: Arc<Prompts>,
  request: EvaluationRequest,
  tx: mpsc::Sender<EvaluationProgress>,
) {
  let built = prompt::build(&request, &prompts);
  let start = Instant::now();

  let mut chunks = match transport.generate_stream(&built.system_instruction, &built.data_prompt).await {
    Ok(rx) => rx,
    Err(e) => {
      send_failure(&tx, &prompts, e.into()).await;
      return;
    }
  };

  let mut accumulated = String::new();
  let mut chunk_count = 0usize;
  while let Some(chunk) = chunks.recv().await {
    match chunk {
      Ok(text) if text.is_empty() => continue,
      Ok(text) => {
        chunk_count += 1;
        accumulated.push_str(&text);
        let progress = EvaluationProgress { partial: accumulated.clone(), complete: None };
        if tx.send(progress).await.is_err() {
          debug!(target: "evaluation", chunk_count, "Stream consumer went away; stopping");
          return;
        }
      }
      Err(e) => {
        send_failure(&tx, &prompts, e.into()).await;
        return;
      }
    }
  }

  info!(target: "evaluation", elapsed = ?start.elapsed(), chunk_count, raw_len = accumulated.len(), "Streamed completion finished");
  let evaluation = finish(&accumulated, &prompts);
  let _ = tx.send(EvaluationProgress { partial: accumulated, complete: Some(evaluation) }).await;
}
