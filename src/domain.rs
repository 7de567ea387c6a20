//! Domain models: conversation transcript, evaluation request, parsed evaluation, personas.

use serde::{Deserialize, Serialize};

/// Who said a line of the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
  User,
  Character,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
  pub speaker: Speaker,
  pub text: String,
}

impl Turn {
  pub fn user(text: impl Into<String>) -> Self {
    Self { speaker: Speaker::User, text: text.into() }
  }

  pub fn character(text: impl Into<String>) -> Self {
    Self { speaker: Speaker::Character, text: text.into() }
  }
}

/// Ordered conversation between the student and an AI persona.
/// Insertion order is chronological order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
  pub fn new(turns: Vec<Turn>) -> Self {
    Self(turns)
  }

  pub fn turns(&self) -> &[Turn] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<Turn> for Transcript {
  fn from_iter<I: IntoIterator<Item = Turn>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Everything the evaluator needs, created once when the student submits a reflection.
#[derive(Clone, Debug)]
pub struct EvaluationRequest {
  pub character_label: String,
  pub topic: String,
  pub transcript: Transcript,
  pub character_context: Option<String>,
  pub user_reflection: String,
}

/// Structured result of one evaluation.
///
/// Scores are `None` when the model did not emit them; `Some(0)` only comes
/// from an explicit zero (or from the error evaluation).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEvaluation {
  pub textual_feedback: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub conversation_score: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub conversation_rationale: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reflection_score: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reflection_rationale: Option<String>,
}

/// An AI character the student talks to (grounded in a biography snippet).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
  pub name: String,
  #[serde(default)]
  pub bio: String,
  #[serde(default)]
  pub style: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parsed_evaluation_serializes_camel_case_and_skips_absent_fields() {
    let ev = ParsedEvaluation {
      textual_feedback: "ok".into(),
      reflection_score: Some(0),
      ..Default::default()
    };
    let v = serde_json::to_value(&ev).unwrap();
    assert_eq!(v["textualFeedback"], "ok");
    assert_eq!(v["reflectionScore"], 0);
    assert!(v.get("conversationScore").is_none());
    assert!(v.get("conversationRationale").is_none());
  }

  #[test]
  fn transcript_keeps_insertion_order() {
    let t: Transcript = vec![Turn::user("a"), Turn::character("b"), Turn::user("c")]
      .into_iter()
      .collect();
    let texts: Vec<&str> = t.turns().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["a", "b", "c"]);
    assert_eq!(t.turns()[1].speaker, Speaker::Character);
  }
}
