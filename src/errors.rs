use crate::api::ApiResponse;
use crate::models::QuestionField;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Shown to the learner whenever a practice question cannot be produced.
pub const GENERATION_FAILED_MESSAGE: &str =
    "Could not generate a practice question right now. Please try again.";

/// Startup-time configuration problems. None of these are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credential: {0} must be set for the remote backend")]
    MissingCredential(String),

    #[error("Model file not found at '{0}'")]
    MissingModelPath(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("Local backend requested but this build has no local model support (enable the `llama` feature)")]
    LocalBackendUnavailable,
}

/// Failure of a single generation call, local or remote.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Inference endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Inference request failed: {0}")]
    Transport(String),

    #[error("Inference request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model inference failed: {0}")]
    Inference(String),
}

impl BackendError {
    /// Whether the orchestrator may try the same call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Transport(_) => true,
            BackendError::Http { status, .. } => *status == 429 || *status >= 500,
            BackendError::MalformedResponse(_)
            | BackendError::ModelLoad(_)
            | BackendError::Inference(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::MalformedResponse(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the generation pipeline and the consistency checker.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Generated question is incomplete, missing: {}", join_fields(.missing))]
    IncompleteGeneration {
        missing: Vec<QuestionField>,
        raw_text: String,
    },

    #[error("Selected choice {0} is the correct answer; nothing to practice")]
    CorrectAnswerSelected(crate::models::Choice),

    #[error("No usable answer letter in {0} model responses")]
    NoUsableVotes(u32),

    #[error("All {attempts} inference calls failed, last error: {last_error}")]
    AllInferencesFailed { attempts: u32, last_error: BackendError },
}

impl PipelineError {
    /// Retry policy used by the orchestrator.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Backend(e) => e.is_retryable(),
            PipelineError::IncompleteGeneration { .. } => true,
            _ => false,
        }
    }
}

fn join_fields(fields: &[QuestionField]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Generation error: {0}")]
    GenerationError(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Rejected request"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::GenerationError(pipeline_error) => {
                let status = match pipeline_error {
                    PipelineError::CorrectAnswerSelected(_) => StatusCode::BAD_REQUEST,
                    PipelineError::IncompleteGeneration { .. } | PipelineError::NoUsableVotes(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    PipelineError::Backend(BackendError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                    PipelineError::Backend(_) | PipelineError::AllInferencesFailed { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    status = %status,
                    error = %self,
                    "Generation error"
                );
                let message = match pipeline_error {
                    PipelineError::CorrectAnswerSelected(_) => self.to_string(),
                    _ => context
                        .user_friendly_message
                        .unwrap_or_else(|| GENERATION_FAILED_MESSAGE.to_string()),
                };
                (status, Json(ApiResponse::error(message)))
            }
        }
    }

    /// Simple conversion without context
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}
