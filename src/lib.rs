pub mod api;
pub mod config;
pub mod consistency;
pub mod dataset;
pub mod errors;
pub mod llm_providers;
pub mod local_model;
pub mod logging;
pub mod misconception;
pub mod models;
pub mod output_parser;
pub mod pipeline;
pub mod prompts;
pub mod session;

pub use api::{AppState, create_router};
pub use config::Config;
pub use consistency::{ConsistencyVerdict, SelfConsistencyChecker};
pub use dataset::QuestionBank;
pub use errors::*;
pub use llm_providers::{BackendFactory, BackendKind, GenerationBackend, GenerationParams, TextGenerator};
pub use misconception::{MisconceptionCatalog, MisconceptionDescription};
pub use models::*;
pub use output_parser::{OutputParser, QuestionDraft};
pub use pipeline::{PracticeQuestion, QuestionGenerationPipeline};
pub use prompts::{PromptBuilder, PromptFormat};
pub use session::{QuizStep, SessionError, SessionState};
