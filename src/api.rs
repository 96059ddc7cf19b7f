use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    consistency::{ConsistencyVerdict, SelfConsistencyChecker},
    dataset::{DEFAULT_QUIZ_LENGTH, QuestionBank},
    errors::{ApiError, ErrorContext, GENERATION_FAILED_MESSAGE},
    models::{Choice, Question},
    pipeline::{PracticeQuestion, QuestionGenerationPipeline},
    session::{PracticeFeedback, SessionError, SessionState},
};

// Import logging macros
use crate::{log_api_start, log_api_success, log_api_warn};

/// Upper bound on sampled inferences per consistency request
pub const MAX_INFERENCES: u32 = 50;

#[derive(Clone)]
pub struct AppState {
    pub question_bank: Arc<QuestionBank>,
    pub pipeline: QuestionGenerationPipeline,
    pub checker: Arc<SelfConsistencyChecker>,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Deserialize)]
pub struct PracticeRequest {
    pub question_id: i64,
    pub selected_choice: String,
}

#[derive(Deserialize)]
pub struct ConsistencyRequest {
    pub question_text: String,
    pub choices: BTreeMap<Choice, String>,
    pub num_inferences: Option<u32>,
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    /// Explicit quiz questions, in order
    pub question_ids: Option<Vec<i64>>,
    /// Otherwise the first `count` questions of the bank
    pub count: Option<usize>,
}

#[derive(Deserialize)]
pub struct SessionAnswerRequest {
    pub state: SessionState,
    pub choice: String,
}

#[derive(Deserialize)]
pub struct OpenPracticeRequest {
    pub state: SessionState,
    pub wrong_answer_index: usize,
}

#[derive(Deserialize)]
pub struct SessionRequest {
    pub state: SessionState,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub backend: &'static str,
    pub questions: usize,
    pub misconceptions: usize,
}

#[derive(Serialize)]
pub struct SessionAnswerResponse {
    pub state: SessionState,
    pub correct: bool,
    pub correct_choice: Choice,
    pub practice: Option<PracticeQuestion>,
    /// Set when a wrong answer could not be turned into a practice question
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct PracticeAnswerResponse {
    pub state: SessionState,
    #[serde(flatten)]
    pub feedback: PracticeFeedback,
}

fn parse_choice(raw: &str, operation: &str) -> Result<Choice, (StatusCode, Json<ApiResponse<()>>)> {
    Choice::parse_lenient(raw).ok_or_else(|| {
        ApiError::ValidationError(format!("'{}' is not one of A, B, C, D", raw))
            .to_response_with_context(ErrorContext::new(operation, "choice"))
    })
}

fn session_error(err: SessionError, operation: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    ApiError::BadRequest(err.to_string()).to_response_with_context(ErrorContext::new(operation, "session"))
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok",
        backend: state.pipeline.backend_name(),
        questions: state.question_bank.len(),
        misconceptions: state.pipeline.catalog().len(),
    }))
}

pub async fn get_question(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Question> {
    log_api_start!("get_question", question_id = id);

    match state.question_bank.get(id) {
        Some(question) => Ok(Json(ApiResponse::success(question.clone()))),
        None => Err(ApiError::NotFound(format!("Question {}", id))
            .to_response_with_context(ErrorContext::new("get_question", "question").with_id(&id.to_string()))),
    }
}

pub async fn generate_practice(
    State(state): State<AppState>,
    Json(request): Json<PracticeRequest>,
) -> ApiResult<PracticeQuestion> {
    log_api_start!("generate_practice", question_id = request.question_id);
    let choice = parse_choice(&request.selected_choice, "generate_practice")?;
    let context = || ErrorContext::new("generate_practice", "question").with_id(&request.question_id.to_string());

    let question = state.question_bank.get(request.question_id).ok_or_else(|| {
        ApiError::NotFound(format!("Question {}", request.question_id)).to_response_with_context(context())
    })?;

    match state.pipeline.generate_practice_question(question, choice).await {
        Ok(practice) => {
            log_api_success!(
                "generate_practice",
                question_id = request.question_id,
                format!("practice question generated in {} attempt(s)", practice.attempts)
            );
            Ok(Json(ApiResponse::success(practice)))
        }
        Err(e) => Err(ApiError::from(e).to_response_with_context(context())),
    }
}

pub async fn check_consistency(
    State(state): State<AppState>,
    Json(request): Json<ConsistencyRequest>,
) -> ApiResult<ConsistencyVerdict> {
    log_api_start!("check_consistency");
    let context = || ErrorContext::new("check_consistency", "question");

    if let Some(missing) = Choice::ALL.iter().find(|c| !request.choices.contains_key(*c)) {
        return Err(ApiError::ValidationError(format!("choice {} is missing", missing))
            .to_response_with_context(context()));
    }
    if let Some(n) = request.num_inferences {
        if n == 0 || n > MAX_INFERENCES {
            return Err(ApiError::ValidationError(format!(
                "num_inferences must be between 1 and {}",
                MAX_INFERENCES
            ))
            .to_response_with_context(context()));
        }
    }

    match state
        .checker
        .check_answer(&request.question_text, &request.choices, request.num_inferences)
        .await
    {
        Ok(verdict) => {
            log_api_success!("check_consistency", verdict.explanation.clone());
            Ok(Json(ApiResponse::success(verdict)))
        }
        Err(e) => Err(ApiError::from(e).to_response_with_context(
            context().with_user_message("Could not determine an answer right now. Please try again."),
        )),
    }
}

pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<SessionState> {
    log_api_start!("start_session");

    let questions = match request.question_ids {
        Some(ids) => state.question_bank.select(&ids).map_err(|id| {
            ApiError::NotFound(format!("Question {}", id)).to_response_with_context(
                ErrorContext::new("start_session", "question").with_id(&id.to_string()),
            )
        })?,
        None => state
            .question_bank
            .first(request.count.unwrap_or(DEFAULT_QUIZ_LENGTH)),
    };

    let session = SessionState::new()
        .start(questions)
        .map_err(|e| session_error(e, "start_session"))?;
    log_api_success!(
        "start_session",
        format!("quiz started with {} questions", session.questions.len())
    );
    Ok(Json(ApiResponse::success(session)))
}

/// Records a quiz answer. A wrong answer gets a practice question attached;
/// if generation fails the learner sees a message instead of an error.
pub async fn answer_question(
    State(state): State<AppState>,
    Json(request): Json<SessionAnswerRequest>,
) -> ApiResult<SessionAnswerResponse> {
    log_api_start!("answer_question");
    let choice = parse_choice(&request.choice, "answer_question")?;

    let (session, record) = request
        .state
        .answer(choice)
        .map_err(|e| session_error(e, "answer_question"))?;

    let Some(wrong_index) = record.wrong_answer_index else {
        debug!(question_index = record.question_index, "Correct answer");
        return Ok(Json(ApiResponse::success(SessionAnswerResponse {
            state: session,
            correct: true,
            correct_choice: record.correct_choice,
            practice: None,
            message: None,
        })));
    };

    let question = session.wrong_answers[wrong_index].question.clone();
    let (session, practice, message) = match state.pipeline.generate_practice_question(&question, choice).await {
        Ok(practice) => {
            let session = session
                .record_practice(wrong_index, &practice)
                .map_err(|e| session_error(e, "answer_question"))?;
            (session, Some(practice), None)
        }
        Err(e) => {
            log_api_warn!(
                "answer_question",
                question_id = question.id.unwrap_or_default(),
                format!("practice generation failed: {}", e)
            );
            let session = session
                .record_practice_failure(wrong_index, GENERATION_FAILED_MESSAGE)
                .map_err(|e| session_error(e, "answer_question"))?;
            (session, None, Some(GENERATION_FAILED_MESSAGE.to_string()))
        }
    };

    Ok(Json(ApiResponse::success(SessionAnswerResponse {
        state: session,
        correct: false,
        correct_choice: record.correct_choice,
        practice,
        message,
    })))
}

pub async fn open_practice(Json(request): Json<OpenPracticeRequest>) -> ApiResult<SessionState> {
    let session = request
        .state
        .open_practice(request.wrong_answer_index)
        .map_err(|e| session_error(e, "open_practice"))?;
    Ok(Json(ApiResponse::success(session)))
}

pub async fn answer_practice(Json(request): Json<SessionAnswerRequest>) -> ApiResult<PracticeAnswerResponse> {
    let choice = parse_choice(&request.choice, "answer_practice")?;
    let feedback = request
        .state
        .answer_practice(choice)
        .map_err(|e| session_error(e, "answer_practice"))?;

    if !feedback.correct {
        warn!(selected = %choice, correct = %feedback.correct_choice, "Practice question answered incorrectly");
    }
    Ok(Json(ApiResponse::success(PracticeAnswerResponse {
        state: request.state,
        feedback,
    })))
}

pub async fn back_to_review(Json(request): Json<SessionRequest>) -> ApiResult<SessionState> {
    let session = request
        .state
        .back_to_review()
        .map_err(|e| session_error(e, "back_to_review"))?;
    Ok(Json(ApiResponse::success(session)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/questions/:id", get(get_question))
        .route("/api/practice", post(generate_practice))
        .route("/api/consistency", post(check_consistency))
        // Quiz session routes; the client holds the state between calls
        .route("/api/session/start", post(start_session))
        .route("/api/session/answer", post(answer_question))
        .route("/api/session/practice/open", post(open_practice))
        .route("/api/session/practice/answer", post(answer_practice))
        .route("/api/session/review", post(back_to_review))
        .with_state(state)
}
