#![allow(dead_code)]

use async_trait::async_trait;
use misconception_tutor::{
    BackendError, Choice, GenerationParams, MisconceptionCatalog, MisconceptionRecord, Question, TextGenerator,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Generator that replays queued responses, then repeats a fallback.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: &str) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn with_fallback(mut self, response: &str) -> Self {
        self.fallback = Some(response.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| BackendError::Transport("script exhausted".to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Generator that returns its prompt followed by a fixed completion, the way
/// hosted text-generation endpoints do by default.
pub struct EchoingGenerator {
    completion: String,
    trim_prompt: bool,
}

impl EchoingGenerator {
    pub fn new(completion: &str) -> Self {
        Self {
            completion: completion.to_string(),
            trim_prompt: false,
        }
    }

    /// Echo the prompt with trailing whitespace removed, so it is no longer an
    /// exact prefix of the response.
    pub fn trimmed(mut self) -> Self {
        self.trim_prompt = true;
        self
    }
}

#[async_trait]
impl TextGenerator for EchoingGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, BackendError> {
        let echoed = if self.trim_prompt { prompt.trim_end() } else { prompt };
        Ok(format!("{}\n{}", echoed, self.completion))
    }

    fn backend_name(&self) -> &'static str {
        "echoing"
    }

    fn model_name(&self) -> &str {
        "echoing-model"
    }
}

pub const WELL_FORMED_OUTPUT: &str = "---\n\
Question: What is 2 + 3 x 4?\n\
A) 20\n\
B) 14\n\
C) 24\n\
D) 9\n\
Correct Answer: B\n\
Explanation: Multiply before adding: 3 x 4 = 12, then 2 + 12 = 14.\n\
---";

pub const INCOMPLETE_OUTPUT: &str = "Question: What is 2 + 3 x 4?\nA) 20\nB) 14";

/// Order-of-operations question where B carries misconception 42 and C has none.
pub fn bidmas_question() -> Question {
    Question {
        id: Some(101),
        construct_name: Some("Use the order of operations to carry out calculations".to_string()),
        subject_name: Some("BIDMAS".to_string()),
        text: "3 + 4 x 2 = ?".to_string(),
        answer_a_text: "11".to_string(),
        answer_b_text: "14".to_string(),
        answer_c_text: "10".to_string(),
        answer_d_text: "24".to_string(),
        correct_choice: Choice::A,
        misconception_a_id: None,
        misconception_b_id: Some(42),
        misconception_c_id: None,
        misconception_d_id: Some(999),
    }
}

pub fn fractions_question() -> Question {
    Question {
        id: Some(202),
        construct_name: None,
        subject_name: None,
        text: "1/2 + 1/3 = ?".to_string(),
        answer_a_text: "2/5".to_string(),
        answer_b_text: "5/6".to_string(),
        answer_c_text: "2/6".to_string(),
        answer_d_text: "1/6".to_string(),
        correct_choice: Choice::B,
        misconception_a_id: Some(7),
        misconception_b_id: None,
        misconception_c_id: None,
        misconception_d_id: None,
    }
}

pub fn catalog() -> MisconceptionCatalog {
    MisconceptionCatalog::new(vec![
        MisconceptionRecord {
            id: 42,
            description: "Carries out operations from left to right regardless of priority order".to_string(),
        },
        MisconceptionRecord {
            id: 7,
            description: "Adds the numerators and the denominators".to_string(),
        },
    ])
}
