//! Loading service configuration (localized prompt templates + evaluation settings) from TOML.
//!
//! See `AppConfig`, `Prompts` and `EvaluationSettings` for the expected schema.
//! Every field is optional in the file; missing ones keep their defaults.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub evaluation: EvaluationSettings,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct EvaluationSettings {
  /// Ask for JSON output when the transport can constrain it.
  /// Streaming evaluations always use the labeled-text format.
  pub structured_output: bool,
}

/// Localized template strings used to build prompts and fallback text.
/// `{key}` placeholders are filled by `util::fill_template`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Evaluation system instruction
  pub evaluation_role: String,
  pub evaluation_context: String,
  pub snippet_missing: String,
  pub conversation_rubric: String,
  pub reflection_rubric: String,
  pub feedback_rubric: String,
  pub response_format: String,
  pub example_intro: String,
  pub example_conversation_rationale: String,
  pub example_reflection_rationale: String,
  pub example_feedback: String,
  pub structured_directive: String,
  // Evaluation data prompt
  pub evaluation_data_template: String,
  pub student_label: String,
  // Fallback composition
  pub fallback_template: String,
  pub no_rationale: String,
  pub overall_feedback_heading: String,
  pub default_feedback: String,
  // Failure text
  pub error_feedback_template: String,
  pub evaluation_error: String,
  pub evaluation_error_detail: String,
  // Persona chat
  pub character_system: String,
  pub character_style: String,
  pub no_response: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      evaluation_role: "You are an expert educational evaluator. You assess how a student played an educational chat game with a historical character and how well the student reflected on it afterwards.".into(),
      evaluation_context: "CONTEXT\nThe student talked with the AI character \"{character}\".\nCharacter profile: {snippet}\nGeneral theme: {topic}".into(),
      snippet_missing: "Not provided".into(),
      conversation_rubric: "1. Conversation evaluation\n   * Judge the relevance and depth of the student's questions or arguments, their strategy and their ability to use what the character said.\n   * Give an integer score from 0 to 10.\n   * Explain the score in two or three sentences.".into(),
      reflection_rubric: "2. Reflection evaluation\n   * Judge the student's self-awareness, critical analysis of their own strategy and the link between the game and what they learned.\n   * Give an integer score from 0 to 10.\n   * Explain the score in two or three sentences.".into(),
      feedback_rubric: "3. Overall feedback\n   * Write it in Markdown.\n   * Include strengths, areas for improvement and any additional comments.\n   * Keep an encouraging, constructive tone.\n\nWhen you create Markdown tables use pipes (|) between columns and a separator row of dashes (---) under the header.".into(),
      response_format: "RESPONSE FORMAT\nStart your answer with these four lines, each on its own line, replacing the bracketed parts. Do not add anything else on those lines. Write the overall feedback after them.".into(),
      example_intro: "Example response:".into(),
      example_conversation_rationale: "The student asked relevant questions and narrowed the field well. Some questions could have been more direct to get more information out of each turn.".into(),
      example_reflection_rationale: "The reflection shows good self-awareness and a critical look at the student's own choices. What worked and what did not is clearly identified.".into(),
      example_feedback: "**Overall strengths:**\n*   Good questioning strategy during the game.\n*   Honest, well structured reflection.\n\n**Areas for improvement:**\n*   Use each question to gather more clues.\n*   Connect the game more explicitly with the historical period in the reflection.".into(),
      structured_directive: "OUTPUT AS JSON\nReturn a single JSON object and nothing else, with the keys: conversation_score (integer 0-10), conversation_rationale (string), reflection_score (integer 0-10), reflection_rationale (string), feedback (Markdown string with the overall feedback).".into(),
      evaluation_data_template: "CONVERSATION TRANSCRIPT:\n{conversation}\n\nSTUDENT REFLECTION:\n{reflection}\n\nEvaluate the conversation and the reflection following the instructions.".into(),
      student_label: "Student".into(),
      fallback_template: "### Evaluation summary\n\n**Conversation score:** {conversation_score}\n\n{conversation_rationale}\n\n**Reflection score:** {reflection_score}\n\n{reflection_rationale}\n".into(),
      no_rationale: "No rationale provided.".into(),
      overall_feedback_heading: "### Overall feedback".into(),
      default_feedback: "No additional feedback was provided.".into(),
      error_feedback_template: "An error occurred: {error}".into(),
      evaluation_error: "The evaluation could not be completed because of an error.".into(),
      evaluation_error_detail: "Evaluation error occurred".into(),
      character_system: "You are {name}. Stay in character at all times and answer as {name} would, using first person.\nBiography: {bio}\nConversation topic: {topic}\nKeep answers short (at most a few sentences) and historically plausible.".into(),
      character_style: "Speaking style: {style}".into(),
      no_response: "I don't know how to answer that right now.".into(),
    }
  }
}

/// Parse an `AppConfig` from TOML text.
pub fn parse_app_config(text: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(text)
}

/// Attempt to load `AppConfig` from EVAL_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("EVAL_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_app_config(&s) {
      Ok(cfg) => {
        info!(target: "reflection_coach", %path, structured_output = cfg.evaluation.structured_output, "Loaded evaluation config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "reflection_coach", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "reflection_coach", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
