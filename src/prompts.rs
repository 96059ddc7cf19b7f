use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::misconception::MisconceptionDescription;
use crate::models::Choice;

/// How a system/user prompt pair is laid out for the target model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptFormat {
    /// System text, blank line, user text. Suits hosted text-generation endpoints.
    #[default]
    Plain,
    /// Llama 3 instruct chat template with header and end-of-turn tokens.
    Llama3Chat,
}

impl FromStr for PromptFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Ok(PromptFormat::Plain),
            "llama3" | "llama3_chat" | "llama-3" => Ok(PromptFormat::Llama3Chat),
            other => Err(format!("unknown prompt format '{}'", other)),
        }
    }
}

impl PromptFormat {
    fn render(self, system: &str, user: &str) -> String {
        match self {
            PromptFormat::Plain => format!("{}\n\n{}\n", system, user),
            PromptFormat::Llama3Chat => format!(
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{}<|eot_id|>\
                 <|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|>\
                 <|start_header_id|>assistant<|end_header_id|>\n\n",
                system, user
            ),
        }
    }
}

/// Separator line framing the expected output block.
pub const OUTPUT_DELIMITER: &str = "---";

/// Builds the fixed prompt templates. Same inputs always give the same string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    format: PromptFormat,
}

impl PromptBuilder {
    pub fn new(format: PromptFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PromptFormat {
        self.format
    }

    /// Prompt asking for one new multiple-choice question in the parser's schema.
    /// The targeting clause is left out when no real misconception text is known.
    pub fn build_generation_prompt(
        &self,
        construct_name: &str,
        subject_name: &str,
        question_text: &str,
        correct_answer_text: &str,
        wrong_answer_text: &str,
        misconception: &MisconceptionDescription,
    ) -> String {
        let system = match misconception {
            MisconceptionDescription::Found(text) => format!(
                "You are an educational assistant designed to generate multiple-choice questions \
                 that target the following misconception: \"{}\".\n\
                 Write one new question on the same topic in which a learner holding this \
                 misconception would be drawn to a wrong answer.",
                text
            ),
            MisconceptionDescription::NotProvided | MisconceptionDescription::NotFound(_) => {
                "You are an educational assistant designed to generate multiple-choice questions.\n\
                 Write one new question on the same topic that checks the idea behind the \
                 learner's wrong answer."
                    .to_string()
            }
        };

        let user = format!(
            "Construct Name: {construct_name}\n\
             Subject Name: {subject_name}\n\
             Question Text: {question_text}\n\
             Correct Answer: {correct_answer_text}\n\
             Wrong Answer: {wrong_answer_text}\n\
             \n\
             Please follow this output format exactly and write nothing else:\n\
             {delim}\n\
             Question: <Your Question Text>\n\
             A) <Choice A>\n\
             B) <Choice B>\n\
             C) <Choice C>\n\
             D) <Choice D>\n\
             Correct Answer: <Correct Choice (e.g., A)>\n\
             Explanation: <Brief explanation for the correct answer>\n\
             {delim}",
            delim = OUTPUT_DELIMITER,
        );

        self.format.render(&system, &user)
    }

    /// Strict prompt used by the self-consistency check: the model must reply
    /// with `Answer: X` and nothing else.
    pub fn build_answer_selection_prompt(
        &self,
        question: &str,
        choices: &BTreeMap<Choice, String>,
    ) -> String {
        let system = "You are an expert reasoning assistant. Your task is to determine the single \
                      most accurate answer (A, B, C, or D) for a multiple-choice question based on \
                      the given options.\n\
                      \n\
                      Rules:\n\
                      1. Carefully read the question and all options.\n\
                      2. Use logical reasoning to select the best answer.\n\
                      3. Output your answer strictly in the following format: \"Answer: [A/B/C/D]\"\n\
                      4. Do not provide any explanation or extra information.";

        let choice_lines = Choice::ALL
            .iter()
            .map(|c| {
                format!(
                    "{}) {}",
                    c,
                    choices.get(c).map(String::as_str).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "Question: {}\n\nChoices:\n{}\n\nPlease select the correct answer.",
            question, choice_lines
        );

        self.format.render(system, &user)
    }
}
