use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One of the four labelled answer slots of a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    /// Scan order used everywhere a deterministic walk over the slots matters.
    pub const ALL: [Choice; 4] = [Choice::A, Choice::B, Choice::C, Choice::D];

    pub fn letter(self) -> char {
        match self {
            Choice::A => 'A',
            Choice::B => 'B',
            Choice::C => 'C',
            Choice::D => 'D',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Choice::A),
            'B' => Some(Choice::B),
            'C' => Some(Choice::C),
            'D' => Some(Choice::D),
            _ => None,
        }
    }

    /// Lenient parse used on model output: accepts `"b"`, `"B"`, `"B) 42"`,
    /// `"B. 42"` but not `"Because"`.
    pub fn parse_lenient(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_start_matches(['(', '[']);
        let mut chars = trimmed.chars();
        let choice = Self::from_letter(chars.next()?)?;
        match chars.next() {
            None => Some(choice),
            Some(next) if !next.is_alphanumeric() => Some(choice),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A dataset question row. Column names follow the source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "QuestionId", default)]
    pub id: Option<i64>,
    #[serde(rename = "ConstructName", default)]
    pub construct_name: Option<String>,
    #[serde(rename = "SubjectName", default)]
    pub subject_name: Option<String>,
    #[serde(rename = "QuestionText")]
    pub text: String,
    #[serde(rename = "AnswerAText")]
    pub answer_a_text: String,
    #[serde(rename = "AnswerBText")]
    pub answer_b_text: String,
    #[serde(rename = "AnswerCText")]
    pub answer_c_text: String,
    #[serde(rename = "AnswerDText")]
    pub answer_d_text: String,
    #[serde(rename = "CorrectAnswer")]
    pub correct_choice: Choice,
    #[serde(rename = "MisconceptionAId", default)]
    pub misconception_a_id: Option<i64>,
    #[serde(rename = "MisconceptionBId", default)]
    pub misconception_b_id: Option<i64>,
    #[serde(rename = "MisconceptionCId", default)]
    pub misconception_c_id: Option<i64>,
    #[serde(rename = "MisconceptionDId", default)]
    pub misconception_d_id: Option<i64>,
}

impl Question {
    pub fn choice_text(&self, choice: Choice) -> &str {
        match choice {
            Choice::A => &self.answer_a_text,
            Choice::B => &self.answer_b_text,
            Choice::C => &self.answer_c_text,
            Choice::D => &self.answer_d_text,
        }
    }

    pub fn misconception_id(&self, choice: Choice) -> Option<i64> {
        match choice {
            Choice::A => self.misconception_a_id,
            Choice::B => self.misconception_b_id,
            Choice::C => self.misconception_c_id,
            Choice::D => self.misconception_d_id,
        }
    }

    pub fn choices(&self) -> BTreeMap<Choice, String> {
        Choice::ALL
            .iter()
            .map(|c| (*c, self.choice_text(*c).to_string()))
            .collect()
    }

    pub fn is_correct(&self, choice: Choice) -> bool {
        self.correct_choice == choice
    }
}

/// Row of the misconception mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisconceptionRecord {
    #[serde(rename = "MisconceptionId")]
    pub id: i64,
    #[serde(rename = "MisconceptionName")]
    pub description: String,
}

/// Fields a generated question must carry to be usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionField {
    QuestionText,
    Choice(Choice),
    CorrectChoice,
    Explanation,
}

impl fmt::Display for QuestionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionField::QuestionText => write!(f, "question text"),
            QuestionField::Choice(c) => write!(f, "choice {}", c),
            QuestionField::CorrectChoice => write!(f, "correct answer"),
            QuestionField::Explanation => write!(f, "explanation"),
        }
    }
}

/// A validated practice question produced from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub choices: BTreeMap<Choice, String>,
    pub correct_choice: Choice,
    pub explanation: String,
}

impl GeneratedQuestion {
    pub fn is_correct(&self, choice: Choice) -> bool {
        self.correct_choice == choice
    }
}

/// Vote counts of one self-consistency run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerTally {
    counts: [u32; 4],
}

impl AnswerTally {
    pub fn from_counts(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self {
            counts: [a, b, c, d],
        }
    }

    pub fn record(&mut self, choice: Choice) {
        self.counts[choice as usize] += 1;
    }

    pub fn count(&self, choice: Choice) -> u32 {
        self.counts[choice as usize]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn merge(mut self, other: &AnswerTally) -> Self {
        for choice in Choice::ALL {
            self.counts[choice as usize] += other.count(choice);
        }
        self
    }

    /// Highest count wins; ties go to the earliest slot in A, B, C, D order.
    pub fn majority(&self) -> Choice {
        let mut best = Choice::A;
        for choice in Choice::ALL {
            if self.count(choice) > self.count(best) {
                best = choice;
            }
        }
        best
    }
}

impl fmt::Display for AnswerTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{A: {}, B: {}, C: {}, D: {}}}",
            self.counts[0], self.counts[1], self.counts[2], self.counts[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_lenient_parsing() {
        assert_eq!(Choice::parse_lenient("b"), Some(Choice::B));
        assert_eq!(Choice::parse_lenient(" C "), Some(Choice::C));
        assert_eq!(Choice::parse_lenient("D) 42"), Some(Choice::D));
        assert_eq!(Choice::parse_lenient("(A)"), Some(Choice::A));
        assert_eq!(Choice::parse_lenient("Because"), None);
        assert_eq!(Choice::parse_lenient("E"), None);
        assert_eq!(Choice::parse_lenient(""), None);
    }

    #[test]
    fn test_majority_tie_break_prefers_earlier_slot() {
        let tally = AnswerTally::from_counts(3, 5, 5, 1);
        assert_eq!(tally.majority(), Choice::B);

        let tally = AnswerTally::from_counts(2, 2, 2, 2);
        assert_eq!(tally.majority(), Choice::A);

        let tally = AnswerTally::from_counts(0, 0, 0, 1);
        assert_eq!(tally.majority(), Choice::D);
    }

    #[test]
    fn test_tally_merge_and_display() {
        let mut left = AnswerTally::default();
        left.record(Choice::C);
        let mut right = AnswerTally::default();
        right.record(Choice::C);
        right.record(Choice::A);

        let merged = left.merge(&right);
        assert_eq!(merged.total(), 3);
        assert_eq!(merged.to_string(), "{A: 1, B: 0, C: 2, D: 0}");
    }

    #[test]
    fn test_question_deserializes_from_dataset_columns() {
        let row = serde_json::json!({
            "QuestionId": 7,
            "ConstructName": "Order of operations",
            "SubjectName": "BIDMAS",
            "QuestionText": "3 + 4 x 2 = ?",
            "AnswerAText": "14",
            "AnswerBText": "11",
            "AnswerCText": "10",
            "AnswerDText": "24",
            "CorrectAnswer": "B",
            "MisconceptionAId": 42,
            "MisconceptionBId": null
        });

        let question: Question = serde_json::from_value(row).unwrap();
        assert_eq!(question.correct_choice, Choice::B);
        assert_eq!(question.choice_text(Choice::D), "24");
        assert_eq!(question.misconception_id(Choice::A), Some(42));
        assert_eq!(question.misconception_id(Choice::B), None);
        assert_eq!(question.misconception_id(Choice::C), None);
    }
}
