use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{Choice, GeneratedQuestion, QuestionField};

// Import logging macros
use crate::log_validation;

const QUESTION_PREFIX: &str = "question:";
const CORRECT_ANSWER_PREFIX: &str = "correct answer:";
const EXPLANATION_PREFIX: &str = "explanation:";

/// Whatever could be recovered from one model response. Absent fields stay absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionDraft {
    pub question_text: Option<String>,
    pub choices: BTreeMap<Choice, String>,
    pub correct_choice: Option<Choice>,
    /// Raw value of the `Correct Answer:` line, kept even when no letter could be read from it
    pub correct_answer_raw: Option<String>,
    pub explanation: Option<String>,
}

impl QuestionDraft {
    pub fn missing_fields(&self) -> Vec<QuestionField> {
        let mut missing = Vec::new();
        if self.question_text.is_none() {
            missing.push(QuestionField::QuestionText);
        }
        for choice in Choice::ALL {
            if !self.choices.contains_key(&choice) {
                missing.push(QuestionField::Choice(choice));
            }
        }
        if self.correct_choice.is_none() {
            missing.push(QuestionField::CorrectChoice);
        }
        if self.explanation.is_none() {
            missing.push(QuestionField::Explanation);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Promote to a validated question, or report what is missing.
    pub fn into_question(self) -> Result<GeneratedQuestion, Vec<QuestionField>> {
        let missing = self.missing_fields();
        match (self.question_text, self.correct_choice, self.explanation) {
            (Some(question_text), Some(correct_choice), Some(explanation)) if missing.is_empty() => {
                Ok(GeneratedQuestion {
                    question_text,
                    choices: self.choices,
                    correct_choice,
                    explanation,
                })
            }
            _ => Err(missing),
        }
    }
}

/// Line-oriented, format-tolerant reader for the question schema.
pub struct OutputParser;

impl OutputParser {
    /// Never fails: unrecognised lines are skipped. Each `Question:` line opens
    /// a new block and only the last block counts, so fields echoed ahead of the
    /// model's own question cannot leak into it.
    pub fn parse(raw_text: &str) -> QuestionDraft {
        let mut draft = QuestionDraft::default();

        for line in raw_text.lines() {
            let line = line.trim().trim_start_matches(['*', '#']).trim_start();

            if let Some(value) = field_value(line, QUESTION_PREFIX) {
                if draft != QuestionDraft::default() {
                    debug!("Discarding fields parsed before a later question block");
                }
                draft = QuestionDraft {
                    question_text: Some(value),
                    ..QuestionDraft::default()
                };
            } else if let Some(value) = field_value(line, CORRECT_ANSWER_PREFIX) {
                draft.correct_choice = Choice::parse_lenient(&value);
                draft.correct_answer_raw = Some(value);
            } else if let Some(value) = field_value(line, EXPLANATION_PREFIX) {
                draft.explanation = Some(value);
            } else if let Some((choice, value)) = choice_line(line) {
                draft.choices.insert(choice, value);
            }
        }

        let missing = draft.missing_fields();
        if missing.is_empty() {
            debug!("Parsed complete generated question");
        } else {
            let missing = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            let reason = format!("incomplete generated question, missing: {}", missing);
            log_validation!(failure, "generated_question", error = reason);
        }

        draft
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}

/// Trimmed remainder after `prefix`, ignoring empty values and untouched
/// `<placeholder>` text copied from the template.
fn field_value(line: &str, prefix: &str) -> Option<String> {
    let rest = strip_prefix_ignore_case(line, prefix)?;
    let value = rest.trim().trim_matches('*').trim();
    let is_placeholder = value.starts_with('<') && value.ends_with('>');
    if value.is_empty() || is_placeholder {
        None
    } else {
        Some(value.to_string())
    }
}

fn choice_line(line: &str) -> Option<(Choice, String)> {
    Choice::ALL.iter().find_map(|choice| {
        let prefix = format!("{})", choice.letter().to_ascii_lowercase());
        field_value(line, &prefix).map(|value| (*choice, value))
    })
}
