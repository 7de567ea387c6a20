//! HTTP endpoint handlers. These are thin wrappers that forward to the evaluator
//! and the persona fan-out. Each handler is instrumented and logs sizes and
//! basic result info, never the conversation itself.

use std::sync::Arc;
use axum::{extract::State, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::domain::EvaluationRequest;
use crate::personas::reply_all;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, transport: state.transport().name().to_string() })
}

#[instrument(
  level = "info",
  skip(state, body),
  fields(character = %body.character, messages = body.messages.len(), reflection_len = body.user_reflection.len())
)]
pub async fn http_post_evaluate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<EvaluateIn>,
) -> impl IntoResponse {
  let evaluation = state.evaluator.evaluate(EvaluationRequest::from(body)).await;
  info!(
    target: "evaluation",
    conversation_score = ?evaluation.conversation_score,
    reflection_score = ?evaluation.reflection_score,
    feedback_len = evaluation.textual_feedback.len(),
    "HTTP evaluation served"
  );
  Json(evaluation)
}

#[instrument(level = "info", skip(state, body), fields(personas = body.personas.len(), message_len = body.message.len()))]
pub async fn http_post_personas_reply(
  State(state): State<Arc<AppState>>,
  Json(body): Json<PersonasIn>,
) -> impl IntoResponse {
  let history = to_turns(body.messages);
  let replies = reply_all(
    state.transport(),
    state.evaluator.prompts(),
    &body.personas,
    &body.topic,
    &history,
    &body.message,
  )
  .await;
  Json(PersonasOut { replies: replies.into_iter().map(PersonaReplyOut::from).collect() })
}
