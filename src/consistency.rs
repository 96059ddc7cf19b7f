use futures_util::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConsistencyConfig;
use crate::errors::{BackendError, PipelineError};
use crate::llm_providers::{GenerationParams, TextGenerator, strip_echoed_prompt};
use crate::models::{AnswerTally, Choice};
use crate::prompts::PromptBuilder;

// Import logging macros
use crate::log_performance;

static ANSWER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Answer:\s*([ABCD])\b").expect("answer pattern is a valid regex")
});

/// Letter following the first `Answer:` marker, if any.
pub fn extract_answer(response: &str) -> Option<Choice> {
    ANSWER_PATTERN
        .captures(response)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().chars().next())
        .and_then(Choice::from_letter)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyVerdict {
    pub answer: Choice,
    pub tally: AnswerTally,
    pub explanation: String,
}

/// Outcome of one sampled inference
enum Vote {
    Letter(Choice),
    Unusable,
    Failed(BackendError),
}

/// Majority vote over repeated sampled answers to the same question.
pub struct SelfConsistencyChecker {
    generator: Arc<dyn TextGenerator>,
    prompts: PromptBuilder,
    config: ConsistencyConfig,
}

impl SelfConsistencyChecker {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: PromptBuilder, config: ConsistencyConfig) -> Self {
        Self {
            generator,
            prompts,
            config,
        }
    }

    pub fn default_inferences(&self) -> u32 {
        self.config.num_inferences
    }

    /// Samples the backend `num_inferences` times (configured default when `None`).
    /// Individual backend failures are skipped; only a run where every call failed
    /// is an error.
    pub async fn check_answer(
        &self,
        question: &str,
        choices: &BTreeMap<Choice, String>,
        num_inferences: Option<u32>,
    ) -> Result<ConsistencyVerdict, PipelineError> {
        let runs = num_inferences.unwrap_or(self.config.num_inferences);
        let prompt = self.prompts.build_answer_selection_prompt(question, choices);
        let params = GenerationParams::answer_selection();
        let started = Instant::now();

        info!(
            backend = self.generator.backend_name(),
            num_inferences = runs,
            concurrency = self.config.concurrency,
            "Starting self-consistency check"
        );

        let votes: Vec<Vote> = stream::iter(0..runs)
            .map(|run| {
                let prompt = prompt.as_str();
                let params = &params;
                async move {
                    match self.generator.generate(prompt, params).await {
                        Ok(response) => match extract_answer(strip_echoed_prompt(prompt, &response)) {
                            Some(choice) => {
                                debug!(run, answer = %choice, "Consistency vote recorded");
                                Vote::Letter(choice)
                            }
                            None => {
                                warn!(run, response = %response, "No answer letter found in model response");
                                Vote::Unusable
                            }
                        },
                        Err(e) => {
                            warn!(run, error = %e, "Inference failed during consistency check, skipping");
                            Vote::Failed(e)
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut tally = AnswerTally::default();
        let mut failures = 0u32;
        let mut last_error = None;
        for vote in votes {
            match vote {
                Vote::Letter(choice) => tally.record(choice),
                Vote::Unusable => {}
                Vote::Failed(e) => {
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        log_performance!("consistency_check", duration_ms = started.elapsed().as_millis() as u64);

        if runs > 0 && failures == runs {
            if let Some(last_error) = last_error {
                return Err(PipelineError::AllInferencesFailed {
                    attempts: runs,
                    last_error,
                });
            }
        }
        if tally.total() == 0 {
            return Err(PipelineError::NoUsableVotes(runs - failures));
        }

        let answer = tally.majority();
        let explanation = format!("Answer counts: {}. Majority answer: {}", tally, answer);
        info!(answer = %answer, tally = %tally, failures, "Self-consistency check complete");

        Ok(ConsistencyVerdict {
            answer,
            tally,
            explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_answer_variants() {
        assert_eq!(extract_answer("Answer: C extra text"), Some(Choice::C));
        assert_eq!(extract_answer("answer:b"), Some(Choice::B));
        assert_eq!(extract_answer("Answer: [A/B/C/D]"), None);
        assert_eq!(extract_answer("Answer: [A/B/C/D]\nAnswer: D"), Some(Choice::D));
        assert_eq!(extract_answer("I think... Answer:   A. Because"), Some(Choice::A));
        assert_eq!(extract_answer("Answer: A\nAnswer: B"), Some(Choice::A));
        assert_eq!(extract_answer("The answer is C"), None);
        assert_eq!(extract_answer("Answer: E"), None);
        assert_eq!(extract_answer("Answer: Because it is bigger"), None);
        assert_eq!(extract_answer(""), None);
    }
}
