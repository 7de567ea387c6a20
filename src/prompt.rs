//! Evaluation prompt assembly.
//!
//! Produces the system instruction (role, game context, rubric, the four
//! labeled output fields and a worked example) and the data prompt (transcript
//! plus the student's reflection). Pure functions of the request and the
//! localized templates.

use crate::config::Prompts;
use crate::domain::{EvaluationRequest, Speaker};
use crate::parser::Field;
use crate::util::{fill_template, is_blank};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltPrompt {
  pub system_instruction: String,
  pub data_prompt: String,
}

/// Labeled-text prompt pair.
pub fn build(request: &EvaluationRequest, prompts: &Prompts) -> BuiltPrompt {
  BuiltPrompt {
    system_instruction: build_system_instruction(request, prompts),
    data_prompt: build_data_prompt(request, prompts),
  }
}

/// Prompt pair asking for a JSON object instead of labeled lines.
pub fn build_structured(request: &EvaluationRequest, prompts: &Prompts) -> BuiltPrompt {
  let mut built = build(request, prompts);
  built.system_instruction.push_str("\n\n");
  built.system_instruction.push_str(&prompts.structured_directive);
  built
}

pub fn build_system_instruction(request: &EvaluationRequest, prompts: &Prompts) -> String {
  let snippet = request
    .character_context
    .as_deref()
    .filter(|s| !is_blank(s))
    .unwrap_or(prompts.snippet_missing.as_str());

  let context = fill_template(
    &prompts.evaluation_context,
    &[
      ("character", request.character_label.as_str()),
      ("snippet", snippet),
      ("topic", request.topic.as_str()),
    ],
  );

  let format_block = Field::ALL
    .iter()
    .map(|f| format!("{}: {}", f.label(), f.placeholder()))
    .collect::<Vec<_>>()
    .join("\n");

  let example = format!(
    "{}: 7\n{}: {}\n{}: 8\n{}: {}\n\n{}",
    Field::ConversationScore.label(),
    Field::ConversationRationale.label(),
    prompts.example_conversation_rationale,
    Field::ReflectionScore.label(),
    Field::ReflectionRationale.label(),
    prompts.example_reflection_rationale,
    prompts.example_feedback,
  );

  [
    prompts.evaluation_role.clone(),
    context,
    prompts.conversation_rubric.clone(),
    prompts.reflection_rubric.clone(),
    prompts.feedback_rubric.clone(),
    format!("{}\n{}", prompts.response_format, format_block),
    format!("{}\n{}", prompts.example_intro, example),
  ]
  .join("\n\n")
}

/// Transcript as `speaker: text` blocks separated by a blank line, then the reflection.
pub fn render_transcript(request: &EvaluationRequest, prompts: &Prompts) -> String {
  request
    .transcript
    .turns()
    .iter()
    .map(|turn| {
      let speaker = match turn.speaker {
        Speaker::User => prompts.student_label.as_str(),
        Speaker::Character => request.character_label.as_str(),
      };
      format!("{}: {}", speaker, turn.text)
    })
    .collect::<Vec<_>>()
    .join("\n\n")
}

pub fn build_data_prompt(request: &EvaluationRequest, prompts: &Prompts) -> String {
  let conversation = render_transcript(request, prompts);
  fill_template(
    &prompts.evaluation_data_template,
    &[("conversation", conversation.as_str()), ("reflection", request.user_reflection.as_str())],
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{Transcript, Turn};

  fn request() -> EvaluationRequest {
    EvaluationRequest {
      character_label: "Marie Curie".into(),
      topic: "radioactivity".into(),
      transcript: Transcript::new(vec![
        Turn::user("Were you a scientist?"),
        Turn::character("Yes, I studied radiation."),
      ]),
      character_context: Some("Physicist and chemist, two Nobel prizes.".into()),
      user_reflection: "I should have asked about her family earlier.".into(),
    }
  }

  #[test]
  fn system_instruction_lists_all_four_labels_in_order() {
    let s = build_system_instruction(&request(), &Prompts::default());
    let pos: Vec<usize> = Field::ALL
      .iter()
      .map(|f| s.find(&format!("{}: {}", f.label(), f.placeholder())).expect("label present"))
      .collect();
    assert!(pos.windows(2).all(|w| w[0] < w[1]));
    assert!(s.contains("Marie Curie"));
    assert!(s.contains("two Nobel prizes"));
    assert!(s.contains("radioactivity"));
    assert!(s.contains("PUNTEGGIO_CONVERSAZIONE: 7"));
  }

  #[test]
  fn missing_snippet_uses_placeholder() {
    let mut req = request();
    req.character_context = Some("   ".into());
    let prompts = Prompts::default();
    let s = build_system_instruction(&req, &prompts);
    assert!(s.contains(&format!("Character profile: {}", prompts.snippet_missing)));
  }

  #[test]
  fn data_prompt_renders_speakers_and_reflection() {
    let mut prompts = Prompts::default();
    prompts.student_label = "Studente".into();
    let d = build_data_prompt(&request(), &prompts);
    assert!(d.contains("Studente: Were you a scientist?\n\nMarie Curie: Yes, I studied radiation."));
    assert!(d.contains("I should have asked about her family earlier."));
  }

  #[test]
  fn empty_transcript_is_allowed() {
    let mut req = request();
    req.transcript = Transcript::default();
    let built = build(&req, &Prompts::default());
    assert!(built.data_prompt.contains("STUDENT REFLECTION:"));
  }

  #[test]
  fn building_is_deterministic() {
    let prompts = Prompts::default();
    assert_eq!(build(&request(), &prompts), build(&request(), &prompts));
  }

  #[test]
  fn structured_prompt_appends_json_directive() {
    let prompts = Prompts::default();
    let built = build_structured(&request(), &prompts);
    assert!(built.system_instruction.ends_with(&prompts.structured_directive));
  }
}
