use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Choice, GeneratedQuestion, Question};
use crate::pipeline::PracticeQuestion;

/// Where the learner is in the quiz flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "index", rename_all = "snake_case")]
pub enum QuizStep {
    Initial,
    /// Answering quiz question `n` (zero-based)
    Quiz(usize),
    Review,
    /// Working on the practice question of wrong answer `n`
    Practice(usize),
}

impl fmt::Display for QuizStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizStep::Initial => write!(f, "initial"),
            QuizStep::Quiz(i) => write!(f, "quiz({})", i),
            QuizStep::Review => write!(f, "review"),
            QuizStep::Practice(i) => write!(f, "practice({})", i),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {action} during step {step}")]
    InvalidTransition { action: &'static str, step: QuizStep },

    #[error("A session needs at least one question")]
    NoQuestions,

    #[error("No wrong answer at index {0}")]
    UnknownWrongAnswer(usize),

    #[error("No practice question is available for wrong answer {0}")]
    PracticeUnavailable(usize),
}

/// A missed quiz question and whatever was generated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrongAnswer {
    pub question_index: usize,
    pub question: Question,
    pub selected: Choice,
    pub misconception_id: Option<i64>,
    #[serde(default)]
    pub misconception_text: Option<String>,
    #[serde(default)]
    pub practice: Option<GeneratedQuestion>,
    /// Learner-facing message when no practice question could be generated
    #[serde(default)]
    pub practice_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_index: usize,
    pub correct: bool,
    pub correct_choice: Choice,
    /// Index into `wrong_answers` when the answer was wrong
    pub wrong_answer_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeFeedback {
    pub correct: bool,
    pub correct_choice: Choice,
    pub explanation: String,
}

/// Whole quiz progress as a plain value. Every transition consumes the
/// state and hands back the next one, so callers own where it lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub step: QuizStep,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub wrong_answers: Vec<WrongAnswer>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            step: QuizStep::Initial,
            questions: Vec::new(),
            wrong_answers: Vec::new(),
        }
    }

    pub fn start(mut self, questions: Vec<Question>) -> Result<Self, SessionError> {
        if self.step != QuizStep::Initial {
            return Err(self.invalid("start a quiz"));
        }
        if questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        self.questions = questions;
        self.wrong_answers.clear();
        self.step = QuizStep::Quiz(0);
        Ok(self)
    }

    pub fn current_question(&self) -> Option<&Question> {
        match self.step {
            QuizStep::Quiz(i) => self.questions.get(i),
            _ => None,
        }
    }

    /// Answer the current quiz question. A wrong answer is recorded; after the
    /// last question the session moves to review.
    pub fn answer(mut self, choice: Choice) -> Result<(Self, AnswerRecord), SessionError> {
        let index = match self.step {
            QuizStep::Quiz(i) if i < self.questions.len() => i,
            _ => return Err(self.invalid("answer a quiz question")),
        };

        let question = &self.questions[index];
        let correct = question.is_correct(choice);
        let correct_choice = question.correct_choice;

        let wrong_answer_index = if correct {
            None
        } else {
            self.wrong_answers.push(WrongAnswer {
                question_index: index,
                question: question.clone(),
                selected: choice,
                misconception_id: question.misconception_id(choice),
                misconception_text: None,
                practice: None,
                practice_error: None,
            });
            Some(self.wrong_answers.len() - 1)
        };

        self.step = if index + 1 < self.questions.len() {
            QuizStep::Quiz(index + 1)
        } else {
            QuizStep::Review
        };

        Ok((
            self,
            AnswerRecord {
                question_index: index,
                correct,
                correct_choice,
                wrong_answer_index,
            },
        ))
    }

    pub fn record_practice(mut self, wrong_index: usize, practice: &PracticeQuestion) -> Result<Self, SessionError> {
        let wrong = self
            .wrong_answers
            .get_mut(wrong_index)
            .ok_or(SessionError::UnknownWrongAnswer(wrong_index))?;
        wrong.misconception_text = practice
            .misconception
            .is_found()
            .then(|| practice.misconception.as_text().to_string());
        wrong.practice = Some(practice.question.clone());
        wrong.practice_error = None;
        Ok(self)
    }

    pub fn record_practice_failure(mut self, wrong_index: usize, message: &str) -> Result<Self, SessionError> {
        let wrong = self
            .wrong_answers
            .get_mut(wrong_index)
            .ok_or(SessionError::UnknownWrongAnswer(wrong_index))?;
        wrong.practice = None;
        wrong.practice_error = Some(message.to_string());
        Ok(self)
    }

    pub fn open_practice(mut self, wrong_index: usize) -> Result<Self, SessionError> {
        if self.step != QuizStep::Review {
            return Err(self.invalid("open a practice question"));
        }
        let wrong = self
            .wrong_answers
            .get(wrong_index)
            .ok_or(SessionError::UnknownWrongAnswer(wrong_index))?;
        if wrong.practice.is_none() {
            return Err(SessionError::PracticeUnavailable(wrong_index));
        }
        self.step = QuizStep::Practice(wrong_index);
        Ok(self)
    }

    /// Check an answer to the open practice question. The step does not change,
    /// so the learner can try again before going back to review.
    pub fn answer_practice(&self, choice: Choice) -> Result<PracticeFeedback, SessionError> {
        let QuizStep::Practice(wrong_index) = self.step else {
            return Err(self.invalid("answer a practice question"));
        };
        let practice = self
            .wrong_answers
            .get(wrong_index)
            .and_then(|w| w.practice.as_ref())
            .ok_or(SessionError::PracticeUnavailable(wrong_index))?;

        Ok(PracticeFeedback {
            correct: practice.is_correct(choice),
            correct_choice: practice.correct_choice,
            explanation: practice.explanation.clone(),
        })
    }

    pub fn back_to_review(mut self) -> Result<Self, SessionError> {
        match self.step {
            QuizStep::Practice(_) => {
                self.step = QuizStep::Review;
                Ok(self)
            }
            _ => Err(self.invalid("return to review")),
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            step: self.step,
        }
    }
}
