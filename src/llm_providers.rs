use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::config::{BackendConfig, RemoteConfig};
use crate::errors::{BackendError, ConfigError};
use crate::local_model::{LocalBackend, ModelLoader};

// Import logging macros
use crate::log_llm_operation;

/// Decoding parameters passed with every generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub num_sequences: u32,
    pub do_sample: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            num_sequences: 1,
            do_sample: true,
        }
    }
}

impl GenerationParams {
    /// Short sampled completions for single-letter answer extraction
    pub fn answer_selection() -> Self {
        Self {
            max_new_tokens: 50,
            ..Self::default()
        }
    }
}

/// Completion without the prompt. Hosted text-generation endpoints return
/// prompt + completion unless asked otherwise.
pub fn strip_echoed_prompt<'a>(prompt: &str, text: &'a str) -> &'a str {
    if prompt.is_empty() {
        return text;
    }
    text.strip_prefix(prompt).unwrap_or(text)
}

/// `prompt -> text` capability shared by every generation strategy.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError>;

    /// Short backend label for logging
    fn backend_name(&self) -> &'static str;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

/// The two generation strategies, chosen once from configuration
#[derive(Debug, Clone)]
pub enum GenerationBackend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl GenerationBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            GenerationBackend::Local(_) => BackendKind::Local,
            GenerationBackend::Remote(_) => BackendKind::Remote,
        }
    }
}

#[async_trait]
impl TextGenerator for GenerationBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        match self {
            GenerationBackend::Local(backend) => backend.generate(prompt, params).await,
            GenerationBackend::Remote(backend) => backend.generate(prompt, params).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            GenerationBackend::Local(backend) => backend.backend_name(),
            GenerationBackend::Remote(backend) => backend.backend_name(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            GenerationBackend::Local(backend) => backend.model_name(),
            GenerationBackend::Remote(backend) => backend.model_name(),
        }
    }
}

/// Hosted inference endpoint reached over HTTP with a bearer credential
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    api_url: String,
    api_key: String,
    timeout_secs: u64,
    forward_parameters: bool,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<InferenceParameters>,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    num_return_sequences: u32,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Text-generation endpoints answer with either a single object or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Single(GeneratedText),
    Batch(Vec<GeneratedText>),
}

impl InferenceResponse {
    fn into_text(self) -> Option<String> {
        match self {
            InferenceResponse::Single(item) => Some(item.generated_text),
            InferenceResponse::Batch(items) => items.into_iter().next().map(|item| item.generated_text),
        }
    }
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingCredential("HUGGINGFACE_API_KEY".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                name: "INFERENCE_TIMEOUT_SECS".to_string(),
                value: format!("{} ({})", config.timeout_secs, e),
            })?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            forward_parameters: config.forward_parameters,
        })
    }

    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let request_body = InferenceRequest {
            inputs: prompt,
            parameters: self.forward_parameters.then(|| InferenceParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                num_return_sequences: params.num_sequences,
                do_sample: params.do_sample,
                return_full_text: false,
            }),
        };

        log_llm_operation!(start, "generate", backend = self.backend_name(), prompt_length = prompt.len());
        let started = Instant::now();

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                backend = self.backend_name(),
                status = %status,
                error = %error_text,
                "Inference API request failed"
            );
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        debug!(backend = self.backend_name(), response_content = %body, "Raw inference response");

        let generated = serde_json::from_str::<InferenceResponse>(&body)
            .ok()
            .and_then(InferenceResponse::into_text)
            .ok_or_else(|| {
                let err = BackendError::MalformedResponse(format!(
                    "expected a generated_text field, got: {}",
                    body.chars().take(200).collect::<String>()
                ));
                log_llm_operation!(error, "generate", backend = self.backend_name(), error = err);
                err
            })?;

        let generated = if !prompt.is_empty() && generated.starts_with(prompt) {
            debug!(backend = self.backend_name(), "Removed echoed prompt from response");
            strip_echoed_prompt(prompt, &generated).to_string()
        } else {
            generated
        };

        log_llm_operation!(
            success,
            "generate",
            backend = self.backend_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            response_length = generated.len()
        );

        Ok(generated)
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> BackendError {
        let classified = if err.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::from(err)
        };
        log_llm_operation!(error, "generate", backend = self.backend_name(), error = classified);
        classified
    }

    pub fn backend_name(&self) -> &'static str {
        "remote"
    }

    pub fn model_name(&self) -> &str {
        &self.api_url
    }
}

/// Factory for creating generation backends based on configuration
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(config: &BackendConfig) -> Result<GenerationBackend, ConfigError> {
        match config.kind {
            BackendKind::Remote => Ok(GenerationBackend::Remote(RemoteBackend::new(&config.remote)?)),
            BackendKind::Local => Ok(GenerationBackend::Local(LocalBackend::new(
                Self::default_loader(config)?,
            ))),
        }
    }

    /// Local backend over a caller-supplied loader
    pub fn local_with_loader(loader: Arc<dyn ModelLoader>) -> GenerationBackend {
        GenerationBackend::Local(LocalBackend::new(loader))
    }

    #[cfg(feature = "llama")]
    fn default_loader(config: &BackendConfig) -> Result<Arc<dyn ModelLoader>, ConfigError> {
        Ok(Arc::new(crate::local_model::LlamaCppLoader::new(config.local.clone())))
    }

    #[cfg(not(feature = "llama"))]
    fn default_loader(_config: &BackendConfig) -> Result<Arc<dyn ModelLoader>, ConfigError> {
        Err(ConfigError::LocalBackendUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_config(api_key: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            api_url: "http://localhost:9/generate".to_string(),
            api_key: api_key.map(str::to_string),
            timeout_secs: 5,
            forward_parameters: false,
        }
    }

    #[test]
    fn test_remote_backend_requires_credential() {
        assert!(matches!(
            RemoteBackend::new(&remote_config(None)),
            Err(ConfigError::MissingCredential(_))
        ));
        assert!(matches!(
            RemoteBackend::new(&remote_config(Some(""))),
            Err(ConfigError::MissingCredential(_))
        ));
        assert!(RemoteBackend::new(&remote_config(Some("hf_key"))).is_ok());
    }

    #[test]
    fn test_request_body_shape() {
        let body = InferenceRequest {
            inputs: "prompt text",
            parameters: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"inputs": "prompt text"})
        );

        let body = InferenceRequest {
            inputs: "prompt text",
            parameters: Some(InferenceParameters {
                max_new_tokens: 50,
                temperature: 0.5,
                top_p: 0.9,
                num_return_sequences: 1,
                do_sample: true,
                return_full_text: false,
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["parameters"]["max_new_tokens"], 50);
        assert_eq!(value["parameters"]["do_sample"], true);
    }

    #[test]
    fn test_response_shapes() {
        let single: InferenceResponse =
            serde_json::from_str(r#"{"generated_text": "Answer: B"}"#).unwrap();
        assert_eq!(single.into_text().as_deref(), Some("Answer: B"));

        let batch: InferenceResponse =
            serde_json::from_str(r#"[{"generated_text": "first"}, {"generated_text": "second"}]"#).unwrap();
        assert_eq!(batch.into_text().as_deref(), Some("first"));

        let empty: InferenceResponse = serde_json::from_str("[]").unwrap();
        assert_eq!(empty.into_text(), None);

        assert!(serde_json::from_str::<InferenceResponse>(r#"{"error": "loading"}"#).is_err());
    }

    #[test]
    fn test_strip_echoed_prompt() {
        assert_eq!(strip_echoed_prompt("Question: x\n", "Question: x\nAnswer: C"), "Answer: C");
        assert_eq!(strip_echoed_prompt("Question: x\n", "Answer: C"), "Answer: C");
        assert_eq!(strip_echoed_prompt("", "Answer: C"), "Answer: C");
    }

    #[test]
    fn test_answer_selection_params() {
        let params = GenerationParams::answer_selection();
        assert_eq!(params.max_new_tokens, 50);
        assert!(params.do_sample);
        assert!(params.temperature > 0.0);
        assert_eq!(params.num_sequences, 1);
    }

    #[cfg(not(feature = "llama"))]
    #[test]
    fn test_local_backend_unavailable_without_feature() {
        let config = crate::config::Config::from_map(
            &[("TUTOR_BACKEND".to_string(), "local".to_string())].into_iter().collect(),
        )
        .unwrap();
        assert!(matches!(
            BackendFactory::create(&config.backend),
            Err(ConfigError::LocalBackendUnavailable)
        ));
    }
}
