//! Fallback feedback composition.
//!
//! When parsing leaves no usable free text, a short Markdown summary is built
//! from whatever scores and rationales were extracted so the caller always has
//! something to render. Pure string work; cannot fail.

use crate::config::Prompts;
use crate::domain::ParsedEvaluation;
use crate::util::{fill_template, is_blank};

const NOT_AVAILABLE: &str = "N/A";

pub fn needs_fallback(evaluation: &ParsedEvaluation) -> bool {
  is_blank(&evaluation.textual_feedback)
}

fn score_text(score: Option<u32>) -> String {
  score.map_or_else(|| NOT_AVAILABLE.to_string(), |s| s.to_string())
}

/// Build the fallback Markdown for an evaluation.
pub fn compose(evaluation: &ParsedEvaluation, prompts: &Prompts) -> String {
  let conversation_score = score_text(evaluation.conversation_score);
  let reflection_score = score_text(evaluation.reflection_score);
  let conversation_rationale = evaluation
    .conversation_rationale
    .as_deref()
    .filter(|r| !is_blank(r))
    .unwrap_or(prompts.no_rationale.as_str());
  let reflection_rationale = evaluation
    .reflection_rationale
    .as_deref()
    .filter(|r| !is_blank(r))
    .unwrap_or(prompts.no_rationale.as_str());

  let summary = fill_template(
    &prompts.fallback_template,
    &[
      ("conversation_score", conversation_score.as_str()),
      ("reflection_score", reflection_score.as_str()),
      ("conversation_rationale", conversation_rationale),
      ("reflection_rationale", reflection_rationale),
    ],
  );

  let provided = evaluation.textual_feedback.trim();
  let overall = if provided.is_empty() { prompts.default_feedback.as_str() } else { provided };

  format!("{}\n{}\n\n{}", summary, prompts.overall_feedback_heading, overall)
}

/// Replace `textual_feedback` with the fallback summary when it is blank.
/// Returns whether the fallback was applied. Scores and rationales are untouched.
pub fn apply(evaluation: &mut ParsedEvaluation, prompts: &Prompts) -> bool {
  if !needs_fallback(evaluation) {
    return false;
  }
  evaluation.textual_feedback = compose(evaluation, prompts);
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blank_feedback_gets_scores_rationales_and_default_text() {
    let prompts = Prompts::default();
    let mut ev = ParsedEvaluation {
      textual_feedback: "  \n ".into(),
      reflection_score: Some(9),
      ..Default::default()
    };
    assert!(apply(&mut ev, &prompts));
    let text = &ev.textual_feedback;
    assert!(text.contains("**Conversation score:** N/A"));
    assert!(text.contains("**Reflection score:** 9"));
    assert_eq!(text.matches(prompts.no_rationale.as_str()).count(), 2);
    assert!(text.contains(&prompts.overall_feedback_heading));
    assert!(text.ends_with(&prompts.default_feedback));
    assert_eq!(ev.reflection_score, Some(9));
    assert_eq!(ev.conversation_score, None);
  }

  #[test]
  fn zero_score_is_shown_as_zero_not_na() {
    let ev = ParsedEvaluation { conversation_score: Some(0), ..Default::default() };
    let text = compose(&ev, &Prompts::default());
    assert!(text.contains("**Conversation score:** 0"));
    assert!(text.contains("**Reflection score:** N/A"));
  }

  #[test]
  fn rationales_are_included_when_present() {
    let ev = ParsedEvaluation {
      conversation_rationale: Some("Asked sharp questions.".into()),
      reflection_rationale: Some("Honest self-assessment.".into()),
      ..Default::default()
    };
    let text = compose(&ev, &Prompts::default());
    assert!(text.contains("Asked sharp questions."));
    assert!(text.contains("Honest self-assessment."));
    assert!(!text.contains(&Prompts::default().no_rationale));
  }

  #[test]
  fn provided_feedback_is_appended_under_heading() {
    let prompts = Prompts::default();
    let ev = ParsedEvaluation { textual_feedback: " Keep going. ".into(), ..Default::default() };
    let text = compose(&ev, &prompts);
    assert!(text.ends_with(&format!("{}\n\nKeep going.", prompts.overall_feedback_heading)));
  }

  #[test]
  fn non_blank_feedback_is_left_alone() {
    let mut ev = ParsedEvaluation { textual_feedback: "Great job.".into(), ..Default::default() };
    assert!(!apply(&mut ev, &Prompts::default()));
    assert_eq!(ev.textual_feedback, "Great job.");
  }

  #[test]
  fn localized_templates_are_used() {
    let mut prompts = Prompts::default();
    prompts.fallback_template = "Conversazione: {conversation_score} / Riflessione: {reflection_score}".into();
    prompts.overall_feedback_heading = "### Feedback complessivo".into();
    prompts.default_feedback = "Nessun feedback aggiuntivo.".into();
    let ev = ParsedEvaluation { conversation_score: Some(6), ..Default::default() };
    let text = compose(&ev, &prompts);
    assert_eq!(
      text,
      "Conversazione: 6 / Riflessione: N/A\n### Feedback complessivo\n\nNessun feedback aggiuntivo."
    );
  }
}
