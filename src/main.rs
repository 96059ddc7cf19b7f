use anyhow::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use misconception_tutor::{
    api::{AppState, create_router},
    config::Config,
    consistency::SelfConsistencyChecker,
    dataset::{load_misconceptions, load_questions},
    llm_providers::{BackendFactory, TextGenerator},
    logging::init_logging,
    pipeline::QuestionGenerationPipeline,
    prompts::PromptBuilder,
};

// Import logging macros
use misconception_tutor::log_system_event;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = init_logging(&config.logging)?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting misconception tutor");

    let question_bank = Arc::new(load_questions(&config.data.questions_path).await?);
    let catalog = Arc::new(load_misconceptions(&config.data.misconceptions_path).await?);

    let backend = BackendFactory::create(&config.backend)?;
    info!(
        backend = backend.backend_name(),
        model = backend.model_name(),
        "Generation backend initialized"
    );
    let generator: Arc<dyn TextGenerator> = Arc::new(backend);
    let prompts = PromptBuilder::new(config.backend.prompt_format);

    let state = AppState {
        question_bank,
        pipeline: QuestionGenerationPipeline::new(
            generator.clone(),
            catalog,
            prompts,
            config.pipeline.clone(),
        ),
        checker: Arc::new(SelfConsistencyChecker::new(
            generator,
            prompts,
            config.consistency.clone(),
        )),
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
