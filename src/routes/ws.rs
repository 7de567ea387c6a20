//! WebSocket upgrade + message loop. Each client message is parsed as JSON.
//! `evaluate` streams progress messages and ends with `evaluation_complete`;
//! everything else gets a single reply.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures::StreamExt;
use tracing::{debug, error, info, instrument};

use crate::domain::EvaluationRequest;
use crate::evaluator::EvaluationProgress;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "reflection_coach", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "reflection_coach", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let sent = match incoming(&txt) {
          Incoming::Reply(reply) => send(&mut socket, &reply).await,
          Incoming::Evaluate(request) => stream_evaluation(&mut socket, &state, request).await,
        };
        if !sent {
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "reflection_coach", "WebSocket disconnected");
}

/// What a client text frame asks for.
#[derive(Debug)]
enum Incoming {
  Reply(ServerWsMessage),
  Evaluate(EvaluationRequest),
}

fn incoming(txt: &str) -> Incoming {
  match serde_json::from_str::<ClientWsMessage>(txt) {
    Ok(ClientWsMessage::Ping) => Incoming::Reply(ServerWsMessage::Pong),
    Ok(ClientWsMessage::Evaluate(body)) => Incoming::Evaluate(EvaluationRequest::from(body)),
    Err(e) => Incoming::Reply(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
  }
}

/// Only the final item carries the parsed evaluation.
fn progress_message(item: EvaluationProgress) -> ServerWsMessage {
  match item.complete {
    Some(evaluation) => ServerWsMessage::EvaluationComplete { partial: item.partial, evaluation },
    None => ServerWsMessage::EvaluationProgress { partial: item.partial },
  }
}

/// Forward streamed progress to the socket. Returns false once the socket is gone,
/// which drops the stream and stops the evaluation task from forwarding.
#[instrument(level = "info", skip_all, fields(character = %request.character_label, turns = request.transcript.len()))]
async fn stream_evaluation(socket: &mut WebSocket, state: &AppState, request: EvaluationRequest) -> bool {
  let mut messages = state.evaluator.evaluate_stream(request).map(progress_message);
  let mut updates = 0usize;
  while let Some(msg) = messages.next().await {
    match &msg {
      ServerWsMessage::EvaluationComplete { evaluation, .. } => {
        info!(target: "evaluation", updates, reflection_score = ?evaluation.reflection_score, "WS evaluation complete");
      }
      _ => updates += 1,
    }
    if !send(socket, &msg).await {
      return false;
    }
  }
  debug!(target: "evaluation", updates, "WS evaluation stream drained");
  true
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  match socket.send(Message::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "reflection_coach", error = %e, "WS send error");
      false
    }
  }
}
