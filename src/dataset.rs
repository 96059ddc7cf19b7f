use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::misconception::MisconceptionCatalog;
use crate::models::{MisconceptionRecord, Question};

/// Number of questions in a quiz when the caller does not pick them.
pub const DEFAULT_QUIZ_LENGTH: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

async fn load_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let display = path.display().to_string();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DatasetError::Io {
            path: display.clone(),
            source,
        })?;
    serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
        path: display,
        source,
    })
}

/// Question rows as a JSON array of objects keyed by the dataset column names.
pub async fn load_questions(path: impl AsRef<Path>) -> Result<QuestionBank, DatasetError> {
    let questions: Vec<Question> = load_rows(path.as_ref()).await?;
    let bank = QuestionBank::new(questions);
    info!(path = %path.as_ref().display(), question_count = bank.len(), "Questions loaded");
    Ok(bank)
}

pub async fn load_misconceptions(path: impl AsRef<Path>) -> Result<MisconceptionCatalog, DatasetError> {
    let records: Vec<MisconceptionRecord> = load_rows(path.as_ref()).await?;
    let catalog = MisconceptionCatalog::new(records);
    info!(path = %path.as_ref().display(), misconception_count = catalog.len(), "Misconception mapping loaded");
    Ok(catalog)
}

/// Questions available to quizzes, addressable by `QuestionId`.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: Vec<Question>,
    by_id: HashMap<i64, usize>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        let mut by_id = HashMap::new();
        for (index, question) in questions.iter().enumerate() {
            match question.id {
                Some(id) => {
                    if by_id.insert(id, index).is_some() {
                        warn!(question_id = id, "Duplicate question id, keeping the later row");
                    }
                }
                None => warn!(row = index, "Question row without id cannot be looked up"),
            }
        }
        Self { questions, by_id }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Question> {
        self.by_id.get(&id).map(|&index| &self.questions[index])
    }

    /// Questions for the given ids in request order; the first unknown id is returned as the error.
    pub fn select(&self, ids: &[i64]) -> Result<Vec<Question>, i64> {
        ids.iter()
            .map(|&id| self.get(id).cloned().ok_or(id))
            .collect()
    }

    pub fn first(&self, count: usize) -> Vec<Question> {
        self.questions.iter().take(count).cloned().collect()
    }
}
