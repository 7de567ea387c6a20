//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{EvaluationRequest, ParsedEvaluation, Persona, Speaker, Transcript, Turn};
use crate::personas::PersonaReply;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Evaluate(EvaluateIn),
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    EvaluationProgress {
        partial: String,
    },
    EvaluationComplete {
        partial: String,
        evaluation: ParsedEvaluation,
    },
    Error {
        message: String,
    },
}

/// One chat message as the frontend stores it.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageIn {
    pub role: String,
    pub content: String,
}

/// `user` is the student; `assistant`, `character` and `model` are the persona.
/// System and unknown roles are not part of the transcript.
pub fn speaker_for_role(role: &str) -> Option<Speaker> {
    match role.trim().to_ascii_lowercase().as_str() {
        "user" => Some(Speaker::User),
        "assistant" | "character" | "model" => Some(Speaker::Character),
        _ => None,
    }
}

pub fn to_turns(messages: Vec<MessageIn>) -> Vec<Turn> {
    messages
        .into_iter()
        .filter_map(|m| match speaker_for_role(&m.role) {
            Some(Speaker::User) => Some(Turn::user(m.content)),
            Some(Speaker::Character) => Some(Turn::character(m.content)),
            None => {
                debug!(target: "evaluation", role = %m.role, "Skipping non-conversation message");
                None
            }
        })
        .collect()
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateIn {
    pub character: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub messages: Vec<MessageIn>,
    #[serde(default)]
    pub character_snippet: Option<String>,
    pub user_reflection: String,
}

impl From<EvaluateIn> for EvaluationRequest {
    fn from(e: EvaluateIn) -> Self {
        EvaluationRequest {
            character_label: e.character,
            topic: e.topic,
            transcript: Transcript::new(to_turns(e.messages)),
            character_context: e.character_snippet,
            user_reflection: e.user_reflection,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PersonasIn {
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub messages: Vec<MessageIn>,
    pub message: String,
}

/// Wire form of a persona reply: exactly one of `text` or `error` is set.
#[derive(Debug, Serialize)]
pub struct PersonaReplyOut {
    pub persona: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PersonaReply> for PersonaReplyOut {
    fn from(r: PersonaReply) -> Self {
        match r.outcome {
            Ok(text) => Self { persona: r.persona, text: Some(text), error: None },
            Err(e) => Self { persona: r.persona, text: None, error: Some(e.to_string()) },
        }
    }
}

#[derive(Serialize)]
pub struct PersonasOut {
    pub replies: Vec<PersonaReplyOut>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub transport: String,
}
