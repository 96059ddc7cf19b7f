mod common;

use common::{EchoingGenerator, ScriptedGenerator};
use misconception_tutor::{
    AnswerTally, BackendError, Choice, PipelineError, PromptBuilder, SelfConsistencyChecker, TextGenerator,
    config::ConsistencyConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn choices() -> BTreeMap<Choice, String> {
    [
        (Choice::A, "20".to_string()),
        (Choice::B, "14".to_string()),
        (Choice::C, "24".to_string()),
        (Choice::D, "9".to_string()),
    ]
    .into_iter()
    .collect()
}

fn checker(generator: Arc<dyn TextGenerator>, concurrency: usize) -> SelfConsistencyChecker {
    SelfConsistencyChecker::new(
        generator,
        PromptBuilder::default(),
        ConsistencyConfig {
            num_inferences: 10,
            concurrency,
        },
    )
}

#[tokio::test]
async fn test_unanimous_votes() {
    let generator = Arc::new(ScriptedGenerator::always("Answer: C extra text"));
    let verdict = checker(generator.clone(), 1)
        .check_answer("What is 2 + 3 x 4?", &choices(), Some(5))
        .await
        .unwrap();

    assert_eq!(verdict.answer, Choice::C);
    assert_eq!(verdict.tally, AnswerTally::from_counts(0, 0, 5, 0));
    assert_eq!(
        verdict.explanation,
        "Answer counts: {A: 0, B: 0, C: 5, D: 0}. Majority answer: C"
    );
    assert_eq!(generator.calls(), 5);

    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("Question: What is 2 + 3 x 4?"));
    assert!(prompt.contains("A) 20\nB) 14\nC) 24\nD) 9"));
}

#[tokio::test]
async fn test_concurrent_runs_reduce_to_the_same_tally() {
    let generator = Arc::new(ScriptedGenerator::always("answer: c"));
    let verdict = checker(generator.clone(), 4)
        .check_answer("q", &choices(), Some(8))
        .await
        .unwrap();

    assert_eq!(verdict.answer, Choice::C);
    assert_eq!(verdict.tally.total(), 8);
    assert_eq!(generator.calls(), 8);
}

#[tokio::test]
async fn test_uses_configured_default_run_count() {
    let generator = Arc::new(ScriptedGenerator::always("Answer: A"));
    let checker = checker(generator.clone(), 2);
    let verdict = checker.check_answer("q", &choices(), None).await.unwrap();

    assert_eq!(checker.default_inferences(), 10);
    assert_eq!(verdict.tally.count(Choice::A), 10);
    assert_eq!(generator.calls(), 10);
}

#[tokio::test]
async fn test_tie_goes_to_earlier_letter() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok("Answer: C".to_string()),
        Ok("Answer: B".to_string()),
        Ok("Answer: C".to_string()),
        Ok("Answer: B".to_string()),
        Ok("Answer: D".to_string()),
    ]));
    let verdict = checker(generator, 1)
        .check_answer("q", &choices(), Some(5))
        .await
        .unwrap();

    assert_eq!(verdict.tally, AnswerTally::from_counts(0, 2, 2, 1));
    assert_eq!(verdict.answer, Choice::B);
}

#[tokio::test]
async fn test_unusable_and_failed_runs_are_discarded() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Ok("I am not sure".to_string()),
        Err(BackendError::Timeout(30)),
        Ok("Answer: D".to_string()),
        Err(BackendError::Transport("connection reset".to_string())),
        Ok("answer: d".to_string()),
    ]));
    let verdict = checker(generator, 1)
        .check_answer("q", &choices(), Some(5))
        .await
        .unwrap();

    assert_eq!(verdict.answer, Choice::D);
    assert_eq!(verdict.tally, AnswerTally::from_counts(0, 0, 0, 2));
}

#[tokio::test]
async fn test_all_runs_failing_is_an_error() {
    // No script and no fallback: every call fails
    let generator = Arc::new(ScriptedGenerator::new(Vec::new()));
    let result = checker(generator, 2).check_answer("q", &choices(), Some(3)).await;

    match result {
        Err(PipelineError::AllInferencesFailed { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last_error, BackendError::Transport(_)));
        }
        other => panic!("expected all inferences to fail, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_usable_votes_is_not_forced_into_a_letter() {
    let generator = Arc::new(ScriptedGenerator::always("The answer is probably the second one"));
    let result = checker(generator, 1).check_answer("q", &choices(), Some(4)).await;

    assert!(matches!(result, Err(PipelineError::NoUsableVotes(4))));
}

#[tokio::test]
async fn test_echoed_prompt_does_not_vote() {
    let generator = Arc::new(EchoingGenerator::new("Answer: C"));
    let verdict = checker(generator, 2)
        .check_answer("What is 2 + 3 x 4?", &choices(), Some(5))
        .await
        .unwrap();

    assert_eq!(verdict.answer, Choice::C);
    assert_eq!(verdict.tally, AnswerTally::from_counts(0, 0, 5, 0));
}

#[tokio::test]
async fn test_format_instruction_in_inexact_echo_is_not_an_answer() {
    // Trailing whitespace trimmed, so the echo cannot be cut off as a prefix
    let generator = Arc::new(EchoingGenerator::new("Answer: C").trimmed());
    let verdict = checker(generator, 1)
        .check_answer("What is 2 + 3 x 4?", &choices(), Some(5))
        .await
        .unwrap();

    assert_eq!(verdict.answer, Choice::C);
    assert_eq!(verdict.tally, AnswerTally::from_counts(0, 0, 5, 0));
}
