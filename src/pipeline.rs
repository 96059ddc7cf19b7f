use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::llm_providers::{GenerationParams, TextGenerator, strip_echoed_prompt};
use crate::misconception::{MisconceptionCatalog, MisconceptionDescription, resolve_misconception_id};
use crate::models::{Choice, GeneratedQuestion, Question};
use crate::output_parser::OutputParser;
use crate::prompts::PromptBuilder;

// Import logging macros
use crate::log_pipeline_event;

const UNKNOWN_LABEL: &str = "Unknown";

/// A generated question together with what it was aimed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeQuestion {
    pub question: GeneratedQuestion,
    pub misconception: MisconceptionDescription,
    pub misconception_id: Option<i64>,
    /// Backend output the question was parsed from
    pub raw_text: String,
    pub attempts: u32,
}

/// Orchestrates resolve -> describe -> prompt -> generate -> parse for one wrong answer.
#[derive(Clone)]
pub struct QuestionGenerationPipeline {
    generator: Arc<dyn TextGenerator>,
    catalog: Arc<MisconceptionCatalog>,
    prompts: PromptBuilder,
    config: PipelineConfig,
}

impl QuestionGenerationPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        catalog: Arc<MisconceptionCatalog>,
        prompts: PromptBuilder,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            catalog,
            prompts,
            config,
        }
    }

    pub fn catalog(&self) -> &MisconceptionCatalog {
        &self.catalog
    }

    pub fn backend_name(&self) -> &'static str {
        self.generator.backend_name()
    }

    pub async fn generate_practice_question(
        &self,
        question: &Question,
        selected: Choice,
    ) -> Result<PracticeQuestion, PipelineError> {
        if question.is_correct(selected) {
            return Err(PipelineError::CorrectAnswerSelected(selected));
        }

        let misconception_id = resolve_misconception_id(question, selected);
        let misconception = self.catalog.describe(misconception_id);
        log_pipeline_event!(start, question_id = question.id, choice = selected, misconception_id = misconception_id);

        let prompt = self.prompts.build_generation_prompt(
            question.construct_name.as_deref().unwrap_or(UNKNOWN_LABEL),
            question.subject_name.as_deref().unwrap_or(UNKNOWN_LABEL),
            &question.text,
            question.choice_text(question.correct_choice),
            question.choice_text(selected),
            &misconception,
        );
        debug!(prompt_length = prompt.len(), "Generation prompt built");

        let params = GenerationParams::default();
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match self.attempt(&prompt, &params).await {
                Ok((question, raw_text)) => {
                    log_pipeline_event!(
                        success,
                        attempt = attempt,
                        duration_ms = started.elapsed().as_millis() as u64
                    );
                    return Ok(PracticeQuestion {
                        question,
                        misconception,
                        misconception_id,
                        raw_text,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log_pipeline_event!(retry, attempt = attempt, error = e);
                    let backoff = self.config.retry_backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<(GeneratedQuestion, String), PipelineError> {
        let response = self.generator.generate(prompt, params).await?;
        let raw_text = strip_echoed_prompt(prompt, &response).to_string();
        match OutputParser::parse(&raw_text).into_question() {
            Ok(question) => Ok((question, raw_text)),
            Err(missing) => Err(PipelineError::IncompleteGeneration { missing, raw_text }),
        }
    }
}
