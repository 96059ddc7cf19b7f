use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::models::{Choice, MisconceptionRecord, Question};

pub const NO_MISCONCEPTION_TEXT: &str = "No misconception provided.";
pub const MISCONCEPTION_NOT_FOUND_TEXT: &str = "Misconception not found.";

/// Outcome of a catalog lookup. The two sentinels stay distinguishable from
/// real descriptions and from each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MisconceptionDescription {
    Found(String),
    NotProvided,
    NotFound(i64),
}

impl MisconceptionDescription {
    pub fn as_text(&self) -> &str {
        match self {
            MisconceptionDescription::Found(text) => text,
            MisconceptionDescription::NotProvided => NO_MISCONCEPTION_TEXT,
            MisconceptionDescription::NotFound(_) => MISCONCEPTION_NOT_FOUND_TEXT,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MisconceptionDescription::Found(_))
    }
}

/// Read-only id -> description table, loaded once from the mapping source.
#[derive(Debug, Clone, Default)]
pub struct MisconceptionCatalog {
    entries: HashMap<i64, String>,
}

impl MisconceptionCatalog {
    /// Later duplicates of an id replace earlier ones; uniqueness is up to the input data.
    pub fn new(records: impl IntoIterator<Item = MisconceptionRecord>) -> Self {
        let entries: HashMap<i64, String> = records
            .into_iter()
            .map(|record| (record.id, record.description))
            .collect();
        debug!(entry_count = entries.len(), "Misconception catalog built");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn describe(&self, id: Option<i64>) -> MisconceptionDescription {
        let Some(id) = id else {
            return MisconceptionDescription::NotProvided;
        };

        match self.entries.get(&id) {
            Some(description) => MisconceptionDescription::Found(description.clone()),
            None => {
                warn!(misconception_id = id, "No misconception found for id");
                MisconceptionDescription::NotFound(id)
            }
        }
    }
}

/// Misconception id stored on the question for the chosen slot, if any.
pub fn resolve_misconception_id(question: &Question, selected: Choice) -> Option<i64> {
    question.misconception_id(selected)
}
