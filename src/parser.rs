//! Score extraction from a finalized evaluation completion.
//!
//! The model is asked for four labeled fields (see `Field`) followed by free
//! Markdown feedback. Extraction is a total function: malformed or partial
//! output degrades to `None` fields and an empty feedback string, never to an
//! error. A completion that is a JSON object (structured mode) is read
//! directly instead.
//!
//! Rationale boundaries: a rationale runs from its label to the next of the
//! other three labels, across as many lines as it takes. A rationale with no
//! label after it ends at the end of its line, so free feedback written below
//! the last rationale stays feedback. Because any other label ends it, labels
//! emitted out of the documented order still extract correctly; the order is
//! reported so callers can log or reject it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::ParsedEvaluation;

/// The four labeled fields, in the order the rubric asks for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
  ConversationScore,
  ConversationRationale,
  ReflectionScore,
  ReflectionRationale,
}

impl Field {
  pub const ALL: [Field; 4] = [
    Field::ConversationScore,
    Field::ConversationRationale,
    Field::ReflectionScore,
    Field::ReflectionRationale,
  ];

  pub fn label(self) -> &'static str {
    match self {
      Field::ConversationScore => "PUNTEGGIO_CONVERSAZIONE",
      Field::ConversationRationale => "MOTIVAZIONE_CONVERSAZIONE",
      Field::ReflectionScore => "PUNTEGGIO_RIFLESSIONE",
      Field::ReflectionRationale => "MOTIVAZIONE_RIFLESSIONE",
    }
  }

  /// What the rubric shows after the label.
  pub fn placeholder(self) -> &'static str {
    if self.is_score() { "<integer 0-10>" } else { "<rationale>" }
  }

  pub fn is_score(self) -> bool {
    matches!(self, Field::ConversationScore | Field::ReflectionScore)
  }

  fn index(self) -> usize {
    match self {
      Field::ConversationScore => 0,
      Field::ConversationRationale => 1,
      Field::ReflectionScore => 2,
      Field::ReflectionRationale => 3,
    }
  }
}

/// How much of the expected structure was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseOutcome {
  /// All four fields present.
  Parsed,
  /// Some fields missing (possibly all, with free text only).
  PartiallyParsed { missing: Vec<Field> },
  /// No fields and no free text.
  Empty,
}

/// Whether labels appeared in rubric order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOrder {
  Canonical,
  OutOfOrder,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseReport {
  pub evaluation: ParsedEvaluation,
  pub outcome: ParseOutcome,
  pub field_order: FieldOrder,
  /// The completion was a JSON object rather than labeled text.
  pub structured: bool,
}

struct Patterns {
  /// Scores capture their digits; rationales match only `LABEL:` and the whitespace after it.
  extract: [Regex; 4],
  strip: [Regex; 4],
  next_label: [Regex; 4],
  next_label_ci: [Regex; 4],
  newlines: Regex,
  bare_label: Regex,
}

static PATTERNS: Lazy<Patterns> = Lazy::new(|| Patterns {
  extract: Field::ALL.map(|f| Regex::new(&extract_pattern(f)).expect("valid extract regex")),
  strip: Field::ALL.map(|f| Regex::new(&strip_pattern(f)).expect("valid strip regex")),
  next_label: Field::ALL.map(|f| Regex::new(&terminators(f)).expect("valid label regex")),
  next_label_ci: Field::ALL.map(|f| Regex::new(&format!("(?i){}", terminators(f))).expect("valid label regex")),
  newlines: Regex::new(r"\n+").expect("valid regex"),
  bare_label: Regex::new(r"(?i)^(PUNTEGGIO_|MOTIVAZIONE_)(CONVERSAZIONE|RIFLESSIONE):").expect("valid regex"),
});

/// Alternation of the other three `LABEL:` markers.
fn terminators(field: Field) -> String {
  Field::ALL
    .iter()
    .filter(|other| **other != field)
    .map(|other| format!("{}:", other.label()))
    .collect::<Vec<_>>()
    .join("|")
}

fn extract_pattern(field: Field) -> String {
  if field.is_score() {
    format!(r"{}:\s*(\d+)", field.label())
  } else {
    format!(r"{}:\s*", field.label())
  }
}

fn strip_pattern(field: Field) -> String {
  if field.is_score() {
    format!(r"(?i){}:\s*\d+\s*", field.label())
  } else {
    format!(r"(?i){}:\s*", field.label())
  }
}

/// Parse a finalized completion. Never panics, never fails.
pub fn parse(raw: &str) -> ParsedEvaluation {
  parse_report(raw).evaluation
}

/// Parse a finalized completion and describe what was found.
pub fn parse_report(raw: &str) -> ParseReport {
  let (evaluation, structured) = match parse_structured(raw) {
    Some(ev) => (ev, true),
    None => (parse_labeled(raw), false),
  };

  let field_order = if structured { FieldOrder::Canonical } else { field_order(raw) };
  if field_order == FieldOrder::OutOfOrder {
    warn!(target: "evaluation", "Evaluation labels emitted out of rubric order");
  }

  let outcome = outcome_of(&evaluation);

  ParseReport { evaluation, outcome, field_order, structured }
}

fn parse_labeled(raw: &str) -> ParsedEvaluation {
  ParsedEvaluation {
    conversation_score: extract_score(raw, Field::ConversationScore),
    conversation_rationale: extract_rationale(raw, Field::ConversationRationale),
    reflection_score: extract_score(raw, Field::ReflectionScore),
    reflection_rationale: extract_rationale(raw, Field::ReflectionRationale),
    textual_feedback: residual_feedback(raw),
  }
}

fn extract_score(raw: &str, field: Field) -> Option<u32> {
  PATTERNS.extract[field.index()]
    .captures(raw)
    .and_then(|c| c.get(1))
    .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// End of a rationale starting at `start`: the next other label if one follows
/// anywhere later, otherwise the end of the current line.
fn rationale_end(text: &str, start: usize, next_label: &Regex) -> usize {
  match next_label.find_at(text, start) {
    Some(m) => m.start(),
    None => text[start..].find('\n').map_or(text.len(), |i| start + i),
  }
}

fn extract_rationale(raw: &str, field: Field) -> Option<String> {
  let label = PATTERNS.extract[field.index()].find(raw)?;
  let end = rationale_end(raw, label.end(), &PATTERNS.next_label[field.index()]);
  Some(raw[label.end()..end].trim().to_string()).filter(|s| !s.is_empty())
}

/// Remove every rationale block of `field`: the label and its content, keeping the terminator.
fn remove_rationales(text: &str, field: Field) -> String {
  let label = &PATTERNS.strip[field.index()];
  let next_label = &PATTERNS.next_label_ci[field.index()];
  let mut out = String::with_capacity(text.len());
  let mut last = 0;
  while let Some(m) = label.find_at(text, last) {
    out.push_str(&text[last..m.start()]);
    last = rationale_end(text, m.end(), next_label);
  }
  out.push_str(&text[last..]);
  out
}

fn strip_once(text: &str) -> String {
  let mut out = text.to_string();
  for field in Field::ALL {
    out = if field.is_score() {
      PATTERNS.strip[field.index()].replace_all(&out, "").into_owned()
    } else {
      remove_rationales(&out, field)
    };
  }
  out
}

/// Remove every labeled block, repeating until nothing is left to remove.
/// Idempotent: stripping an already stripped text changes nothing.
pub fn strip_labeled_blocks(text: &str) -> String {
  let mut current = text.to_string();
  loop {
    let next = strip_once(&current);
    if next == current {
      return current;
    }
    current = next;
  }
}

fn residual_feedback(raw: &str) -> String {
  let stripped = strip_labeled_blocks(raw);
  let collapsed = PATTERNS.newlines.replace_all(&stripped, "\n");
  clean_feedback(collapsed.trim())
}

/// Drop what is left when only a label stub or a stray number survived.
fn clean_feedback(residual: &str) -> String {
  let mut text = residual.to_string();

  let reflection_score = format!("{}:", Field::ReflectionScore.label());
  let reflection_rationale = format!("{}:", Field::ReflectionRationale.label());

  if text.starts_with(&reflection_score) {
    text.clear();
  }
  if let Some(rest) = text.strip_prefix(&reflection_rationale) {
    text = rest.trim().to_string();
  }
  if PATTERNS.bare_label.is_match(&text) {
    text.clear();
  }
  if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
    text.clear();
  }
  text
}

fn field_order(raw: &str) -> FieldOrder {
  let positions: Vec<usize> = Field::ALL
    .iter()
    .filter_map(|f| raw.find(&format!("{}:", f.label())))
    .collect();
  if positions.windows(2).all(|w| w[0] < w[1]) {
    FieldOrder::Canonical
  } else {
    FieldOrder::OutOfOrder
  }
}

fn outcome_of(ev: &ParsedEvaluation) -> ParseOutcome {
  let mut missing = Vec::new();
  if ev.conversation_score.is_none() { missing.push(Field::ConversationScore); }
  if ev.conversation_rationale.is_none() { missing.push(Field::ConversationRationale); }
  if ev.reflection_score.is_none() { missing.push(Field::ReflectionScore); }
  if ev.reflection_rationale.is_none() { missing.push(Field::ReflectionRationale); }

  if missing.is_empty() {
    ParseOutcome::Parsed
  } else if missing.len() == Field::ALL.len() && ev.textual_feedback.trim().is_empty() {
    ParseOutcome::Empty
  } else {
    ParseOutcome::PartiallyParsed { missing }
  }
}

// --- Structured (JSON) completions ---

#[derive(Deserialize)]
struct StructuredEvaluation {
  #[serde(default)] conversation_score: Option<Value>,
  #[serde(default)] conversation_rationale: Option<String>,
  #[serde(default)] reflection_score: Option<Value>,
  #[serde(default)] reflection_rationale: Option<String>,
  #[serde(default)] feedback: Option<String>,
}

/// Strip an optional ```json fence around the completion.
fn unfence(raw: &str) -> &str {
  let t = raw.trim();
  let Some(rest) = t.strip_prefix("```") else { return t };
  let body = rest.split_once('\n').map_or("", |(_, b)| b);
  body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn score_from_json(v: &Value) -> Option<u32> {
  match v {
    Value::Number(n) => n
      .as_u64()
      .and_then(|u| u32::try_from(u).ok())
      .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64).map(|f| f as u32)),
    Value::String(s) => s.trim().parse::<u32>().ok(),
    _ => None,
  }
}

fn parse_structured(raw: &str) -> Option<ParsedEvaluation> {
  let body = unfence(raw);
  if !body.starts_with('{') {
    return None;
  }
  let s: StructuredEvaluation = serde_json::from_str(body).ok()?;
  let nothing_known = s.conversation_score.is_none()
    && s.conversation_rationale.is_none()
    && s.reflection_score.is_none()
    && s.reflection_rationale.is_none()
    && s.feedback.is_none();
  if nothing_known {
    return None;
  }

  let rationale = |r: Option<String>| r.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
  Some(ParsedEvaluation {
    conversation_score: s.conversation_score.as_ref().and_then(score_from_json),
    conversation_rationale: rationale(s.conversation_rationale),
    reflection_score: s.reflection_score.as_ref().and_then(score_from_json),
    reflection_rationale: rationale(s.reflection_rationale),
    textual_feedback: clean_feedback(s.feedback.as_deref().unwrap_or("").trim()),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = "PUNTEGGIO_CONVERSAZIONE: 7\nMOTIVAZIONE_CONVERSAZIONE: Good reasoning\nPUNTEGGIO_RIFLESSIONE: 8\nMOTIVAZIONE_RIFLESSIONE: Deep insight\nExtra summary text.";

  #[test]
  fn extracts_all_fields_and_residual_text() {
    let ev = parse(FULL);
    assert_eq!(ev.conversation_score, Some(7));
    assert_eq!(ev.conversation_rationale.as_deref(), Some("Good reasoning"));
    assert_eq!(ev.reflection_score, Some(8));
    assert_eq!(ev.reflection_rationale.as_deref(), Some("Deep insight"));
    assert_eq!(ev.textual_feedback, "Extra summary text.");
  }

  #[test]
  fn full_completion_reports_parsed_in_canonical_order() {
    let report = parse_report(FULL);
    assert_eq!(report.outcome, ParseOutcome::Parsed);
    assert_eq!(report.field_order, FieldOrder::Canonical);
    assert!(!report.structured);
  }

  #[test]
  fn absent_score_is_none_but_explicit_zero_is_zero() {
    let absent = parse("MOTIVAZIONE_CONVERSAZIONE: nothing to say");
    assert_eq!(absent.conversation_score, None);

    let zero = parse("PUNTEGGIO_CONVERSAZIONE: 0\nMOTIVAZIONE_CONVERSAZIONE: silent");
    assert_eq!(zero.conversation_score, Some(0));
  }

  #[test]
  fn non_numeric_score_is_none() {
    let ev = parse("PUNTEGGIO_CONVERSAZIONE: seven\nSome feedback.");
    assert_eq!(ev.conversation_score, None);
  }

  #[test]
  fn overflowing_score_is_none() {
    let ev = parse("PUNTEGGIO_RIFLESSIONE: 99999999999999999999");
    assert_eq!(ev.reflection_score, None);
  }

  #[test]
  fn only_reflection_score_leaves_everything_else_empty() {
    let report = parse_report("PUNTEGGIO_RIFLESSIONE: 9");
    let ev = &report.evaluation;
    assert_eq!(ev.reflection_score, Some(9));
    assert_eq!(ev.conversation_score, None);
    assert_eq!(ev.conversation_rationale, None);
    assert_eq!(ev.reflection_rationale, None);
    assert_eq!(ev.textual_feedback, "");
    assert_eq!(
      report.outcome,
      ParseOutcome::PartiallyParsed {
        missing: vec![Field::ConversationScore, Field::ConversationRationale, Field::ReflectionRationale]
      }
    );
  }

  #[test]
  fn out_of_order_labels_still_extract_and_are_flagged() {
    let raw = "PUNTEGGIO_RIFLESSIONE: 6\nMOTIVAZIONE_RIFLESSIONE: Honest.\nPUNTEGGIO_CONVERSAZIONE: 4\nMOTIVAZIONE_CONVERSAZIONE: Too vague.\nKeep practicing.";
    let report = parse_report(raw);
    let ev = &report.evaluation;
    assert_eq!(ev.conversation_score, Some(4));
    assert_eq!(ev.conversation_rationale.as_deref(), Some("Too vague."));
    assert_eq!(ev.reflection_score, Some(6));
    assert_eq!(ev.reflection_rationale.as_deref(), Some("Honest."));
    assert_eq!(ev.textual_feedback, "Keep practicing.");
    assert_eq!(report.field_order, FieldOrder::OutOfOrder);
  }

  #[test]
  fn rationale_stops_at_a_label_on_the_same_line() {
    let ev = parse("MOTIVAZIONE_CONVERSAZIONE: fine PUNTEGGIO_RIFLESSIONE: 8");
    assert_eq!(ev.conversation_rationale.as_deref(), Some("fine"));
    assert_eq!(ev.reflection_score, Some(8));
  }

  #[test]
  fn rationale_spans_lines_up_to_the_next_label() {
    let raw = "PUNTEGGIO_CONVERSAZIONE: 7\nMOTIVAZIONE_CONVERSAZIONE: Good reasoning.\nAlso creative.\nPUNTEGGIO_RIFLESSIONE: 8\nMOTIVAZIONE_RIFLESSIONE: Deep insight\nExtra summary text.";
    let ev = parse(raw);
    assert_eq!(ev.conversation_rationale.as_deref(), Some("Good reasoning.\nAlso creative."));
    assert_eq!(ev.reflection_score, Some(8));
    assert_eq!(ev.reflection_rationale.as_deref(), Some("Deep insight"));
    assert_eq!(ev.textual_feedback, "Extra summary text.");
  }

  #[test]
  fn multi_line_rationale_alone_still_gets_fallback() {
    let raw = "MOTIVAZIONE_CONVERSAZIONE: Asked well.\nKept focus.\nPUNTEGGIO_RIFLESSIONE: 9";
    let ev = parse(raw);
    assert_eq!(ev.conversation_rationale.as_deref(), Some("Asked well.\nKept focus."));
    assert_eq!(ev.textual_feedback, "");
  }

  #[test]
  fn rationale_may_start_on_the_next_line() {
    let ev = parse("MOTIVAZIONE_RIFLESSIONE:\nThoughtful and specific.\n\n**Strengths:** clear goals");
    assert_eq!(ev.reflection_rationale.as_deref(), Some("Thoughtful and specific."));
    assert_eq!(ev.textual_feedback, "**Strengths:** clear goals");
  }

  #[test]
  fn markdown_feedback_survives_with_collapsed_newlines() {
    let raw = format!("{}\n\n**Strengths:**\n*   Clear questions.\n\n\n**Improvements:**\n*   Dig deeper.", FULL);
    let ev = parse(&raw);
    assert_eq!(
      ev.textual_feedback,
      "Extra summary text.\n**Strengths:**\n*   Clear questions.\n**Improvements:**\n*   Dig deeper."
    );
  }

  #[test]
  fn crlf_line_endings_are_trimmed_from_rationales() {
    let ev = parse("PUNTEGGIO_CONVERSAZIONE: 5\r\nMOTIVAZIONE_CONVERSAZIONE: Fair.\r\nPUNTEGGIO_RIFLESSIONE: 6\r\n");
    assert_eq!(ev.conversation_rationale.as_deref(), Some("Fair."));
    assert_eq!(ev.reflection_score, Some(6));
  }

  #[test]
  fn dangling_reflection_score_label_blanks_feedback() {
    let ev = parse("PUNTEGGIO_RIFLESSIONE: nine\nLooks good.");
    assert_eq!(ev.reflection_score, None);
    assert_eq!(ev.textual_feedback, "");
  }

  #[test]
  fn bare_label_stub_blanks_feedback() {
    let ev = parse("punteggio_conversazione: N/A\nFine.");
    assert_eq!(ev.textual_feedback, "");
  }

  #[test]
  fn stray_number_blanks_feedback() {
    let ev = parse("MOTIVAZIONE_CONVERSAZIONE: good\n8");
    assert_eq!(ev.conversation_rationale.as_deref(), Some("good"));
    assert_eq!(ev.textual_feedback, "");
  }

  #[test]
  fn feedback_never_starts_with_a_marker() {
    let inputs = [
      FULL,
      "PUNTEGGIO_RIFLESSIONE:",
      "MOTIVAZIONE_RIFLESSIONE:",
      "MOTIVAZIONE_RIFLESSIONE: PUNTEGGIO_CONVERSAZIONE: x",
      "PUNTEGGIO_CONVERSAZIONE: PUNTEGGIO_RIFLESSIONE:",
      "Motivazione_Riflessione: lower case label\nrest",
    ];
    for raw in inputs {
      let ev = parse(raw);
      assert!(!PATTERNS.bare_label.is_match(&ev.textual_feedback), "input {:?} left {:?}", raw, ev.textual_feedback);
    }
  }

  #[test]
  fn parse_is_total_on_adversarial_input() {
    let long = "PUNTEGGIO_CONVERSAZIONE:".repeat(500);
    let inputs = [
      "",
      "   ",
      "\n\n\n",
      ":",
      "PUNTEGGIO_",
      "PUNTEGGIO_CONVERSAZIONE:",
      "MOTIVAZIONE_CONVERSAZIONE:MOTIVAZIONE_CONVERSAZIONE:MOTIVAZIONE_CONVERSAZIONE:",
      "PUNTEGGIO_CONVERSAZIONE: ٣",
      "{not json",
      "{}",
      "```json\n{\"conversation_score\": \"abc\"\n```",
      "émoji 🎓 PUNTEGGIO_RIFLESSIONE: 10 ✓",
      long.as_str(),
    ];
    for raw in inputs {
      let report = parse_report(raw);
      assert!(!PATTERNS.bare_label.is_match(&report.evaluation.textual_feedback), "input {:?}", raw);
    }
    assert_eq!(parse_report("").outcome, ParseOutcome::Empty);
    assert_eq!(parse("émoji 🎓 PUNTEGGIO_RIFLESSIONE: 10 ✓").reflection_score, Some(10));
  }

  #[test]
  fn stripping_is_idempotent() {
    let inputs = [
      FULL,
      "PUNTEGGIO_RIFLESSIONE: 6\nMOTIVAZIONE_RIFLESSIONE: Honest.\nPUNTEGGIO_CONVERSAZIONE: 4\nTail",
      "MOTIVAZIONE_CONVERSAZIONE: a MOTIVAZIONE_RIFLESSIONE: b PUNTEGGIO_CONVERSAZIONE: 1 c",
      "no labels at all",
      "PUNTEGGIO_CONVERSAZIONE: N/A\nMOTIVAZIONE_CONVERSAZIONE:",
      "PUNTEGGIO_PUNTEGGIO_CONVERSAZIONE: 3RIFLESSIONE: 4",
      "motivazione_conversazione: one\ntwo\nPunteggio_Riflessione: 5\nthree",
    ];
    for raw in inputs {
      let once = strip_labeled_blocks(raw);
      assert_eq!(strip_labeled_blocks(&once), once, "input {:?}", raw);
    }
  }

  #[test]
  fn structured_json_completion_is_read_directly() {
    let raw = "```json\n{\"conversation_score\": 6, \"conversation_rationale\": \"Solid.\", \"reflection_score\": \"9\", \"reflection_rationale\": \" Insightful. \", \"feedback\": \"**Great** work.\"}\n```";
    let report = parse_report(raw);
    assert!(report.structured);
    assert_eq!(report.outcome, ParseOutcome::Parsed);
    let ev = report.evaluation;
    assert_eq!(ev.conversation_score, Some(6));
    assert_eq!(ev.reflection_score, Some(9));
    assert_eq!(ev.reflection_rationale.as_deref(), Some("Insightful."));
    assert_eq!(ev.textual_feedback, "**Great** work.");
  }

  #[test]
  fn json_without_known_keys_falls_back_to_labels() {
    let report = parse_report("{\"unrelated\": true}");
    assert!(!report.structured);
    assert_eq!(report.evaluation.textual_feedback, "{\"unrelated\": true}");
  }

  #[test]
  fn json_float_scores_accept_whole_numbers_only() {
    let ev = parse("{\"conversation_score\": 7.0, \"reflection_score\": 7.5}");
    assert_eq!(ev.conversation_score, Some(7));
    assert_eq!(ev.reflection_score, None);
  }
}
