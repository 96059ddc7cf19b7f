//! Standardized logging macros for consistent field names and message patterns across the tutor
//!
//! These macros ensure:
//! - Consistent field naming conventions
//! - Appropriate logging levels for different scenarios
//! - Structured logging with context

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, question_id = $question_id:expr) => {
        tracing::debug!(
            operation = $operation,
            question_id = %$question_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "API operation started"
        );
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            question_id = %$question_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            "API operation completed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            question_id = %$question_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            "API operation warning: {}", $msg
        );
    };
}

// ============================================================================
// Pipeline Logging Macros
// ============================================================================

/// Log generation pipeline steps with misconception context
#[macro_export]
macro_rules! log_pipeline_event {
    (start, question_id = $question_id:expr, choice = $choice:expr, misconception_id = $mid:expr) => {
        tracing::info!(
            component = "pipeline",
            question_id = ?$question_id,
            selected_choice = %$choice,
            misconception_id = ?$mid,
            "Generating practice question"
        );
    };
    (retry, attempt = $attempt:expr, error = $error:expr) => {
        tracing::warn!(
            component = "pipeline",
            attempt = $attempt,
            error = %$error,
            "Generation attempt failed, retrying"
        );
    };
    (success, attempt = $attempt:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = "pipeline",
            attempt = $attempt,
            duration_ms = $duration,
            "Practice question generated"
        );
    };
}

// ============================================================================
// LLM Logging Macros
// ============================================================================

/// Log generation backend operations with provider context
#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, backend = $backend:expr, prompt_length = $len:expr) => {
        tracing::info!(
            component = "llm_providers",
            operation = $operation,
            backend = %$backend,
            prompt_length = $len,
            "LLM operation started"
        );
    };
    (success, $operation:expr, backend = $backend:expr, duration_ms = $duration:expr, response_length = $len:expr) => {
        tracing::info!(
            component = "llm_providers",
            operation = $operation,
            backend = %$backend,
            duration_ms = $duration,
            response_length = $len,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, backend = $backend:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_providers",
            operation = $operation,
            backend = %$backend,
            error = %$error,
            "LLM operation failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(
            component = "llm_providers",
            operation = $operation,
            "LLM operation warning: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and shutdown events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

/// Log performance metrics with consistent structure
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            "Performance metrics"
        );
    };
}

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}

/// Install the global subscriber: console output plus an optional daily-rotated log file.
/// The returned guard must be kept alive for file output to be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info,misconception_tutor=debug"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true);

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;
        return Ok(None);
    }

    std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
        eprintln!("Warning: Could not create logs directory: {}", e);
    });

    let file_appender =
        tracing_appender::rolling::daily(&config.log_directory, "misconception-tutor.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // No ANSI colors in files
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_file);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        log_directory = %config.log_directory,
        "Logging initialized with daily rotation"
    );

    Ok(Some(guard))
}
