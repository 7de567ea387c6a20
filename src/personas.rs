//! In-character replies from one or several personas.
//!
//! Multi-persona games ask every persona the same question at once. Each call
//! is independent: a persona whose call fails gets an error entry while the
//! others still answer.

use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{Persona, Turn};
use crate::error::TransportError;
use crate::transport::Transport;
use crate::util::{fill_template, is_blank};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaReply {
  pub persona: String,
  pub outcome: Result<String, TransportError>,
}

/// System instruction that puts the model in the persona's shoes.
pub fn system_instruction(prompts: &Prompts, persona: &Persona, topic: &str) -> String {
  let mut system = fill_template(
    &prompts.character_system,
    &[("name", persona.name.as_str()), ("bio", persona.bio.as_str()), ("topic", topic)],
  );
  if let Some(style) = persona.style.as_deref().filter(|s| !is_blank(s)) {
    system.push('\n');
    system.push_str(&fill_template(&prompts.character_style, &[("style", style)]));
  }
  system
}

#[instrument(level = "info", skip(transport, prompts, persona, history, message), fields(persona = %persona.name, turns = history.len()))]
pub async fn reply(
  transport: &dyn Transport,
  prompts: &Prompts,
  persona: &Persona,
  topic: &str,
  history: &[Turn],
  message: &str,
) -> Result<String, TransportError> {
  let system = system_instruction(prompts, persona, topic);
  let text = transport.generate_with_history(&system, history, message).await?;
  let text = text.trim();
  if text.is_empty() {
    warn!(target: "evaluation", "Persona produced an empty reply");
    return Ok(prompts.no_response.clone());
  }
  Ok(text.to_string())
}

/// Ask every persona concurrently; results keep the personas' order.
#[instrument(level = "info", skip_all, fields(personas = personas.len(), turns = history.len()))]
pub async fn reply_all(
  transport: &dyn Transport,
  prompts: &Prompts,
  personas: &[Persona],
  topic: &str,
  history: &[Turn],
  message: &str,
) -> Vec<PersonaReply> {
  let calls = personas.iter().map(|persona| async move {
    PersonaReply {
      persona: persona.name.clone(),
      outcome: reply(transport, prompts, persona, topic, history, message).await,
    }
  });
  let replies = join_all(calls).await;

  let failed = replies.iter().filter(|r| r.outcome.is_err()).count();
  info!(target: "evaluation", answered = replies.len() - failed, failed, "Persona fan-out finished");
  replies
}
