use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::llm_providers::BackendKind;
use crate::prompts::PromptFormat;

// Import logging macros
use crate::{log_system_event, log_validation};

pub const DEFAULT_INFERENCE_URL: &str =
    "https://api-inference.huggingface.co/models/meta-llama/Meta-Llama-3-8B-Instruct";
pub const DEFAULT_LOCAL_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub pipeline: PipelineConfig,
    pub consistency: ConsistencyConfig,
    pub data: DataConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Which generation strategy to build and how to reach it
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub prompt_format: PromptFormat,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub forward_parameters: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    pub model_id: String,
    pub cache_dir: Option<String>,
    pub gpu_layers: u32,
    pub context_size: u32,
}

impl LocalConfig {
    /// `cache_dir/model_id` when a cache dir is set, otherwise `model_id` itself.
    pub fn model_path(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(dir).join(&self.model_id),
            None => PathBuf::from(&self.model_id),
        }
    }
}

/// Retry policy of the question generation pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsistencyConfig {
    pub num_inferences: u32,
    pub concurrency: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            num_inferences: 10,
            concurrency: 1,
        }
    }
}

/// Locations of the question bank and the misconception mapping
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub questions_path: String,
    pub misconceptions_path: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&|key| env::var(key).ok())
    }

    /// Load configuration from an explicit key/value map
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(&|key| values.get(key).cloned())
    }

    pub fn from_source(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        log_system_event!(config, "Loading tutor configuration");

        let config = Config {
            backend: BackendConfig::from_source(lookup)?,
            pipeline: PipelineConfig {
                max_attempts: parse_or(lookup, "GENERATION_MAX_ATTEMPTS", 3)?,
                retry_backoff_ms: parse_or(lookup, "GENERATION_RETRY_BACKOFF_MS", 500)?,
            },
            consistency: ConsistencyConfig {
                num_inferences: parse_or(lookup, "CONSISTENCY_INFERENCES", 10)?,
                concurrency: parse_or(lookup, "CONSISTENCY_CONCURRENCY", 1)?,
            },
            data: DataConfig {
                questions_path: lookup("QUESTIONS_PATH")
                    .unwrap_or_else(|| "data/questions.json".to_string()),
                misconceptions_path: lookup("MISCONCEPTIONS_PATH")
                    .unwrap_or_else(|| "data/misconception_mapping.json".to_string()),
            },
            server: ServerConfig {
                port: parse_or(lookup, "PORT", 3000)?,
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            },
            logging: LoggingConfig {
                level: lookup("RUST_LOG")
                    .unwrap_or_else(|| "info,misconception_tutor=debug".to_string()),
                file_enabled: parse_or(lookup, "LOG_FILE_ENABLED", true)?,
                log_directory: lookup("LOG_DIRECTORY").unwrap_or_else(|| "logs".to_string()),
            },
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            backend = ?self.backend.kind,
            prompt_format = ?self.backend.prompt_format,
            inference_url = %self.backend.remote.api_url,
            api_key_masked = %self.backend.remote.api_key.as_deref().map(mask_sensitive_data).unwrap_or_default(),
            local_model = %self.backend.local.model_path().display(),
            max_attempts = self.pipeline.max_attempts,
            consistency_inferences = self.consistency.num_inferences,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Startup checks: anything that fails here is fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend.kind {
            BackendKind::Remote => {
                let has_key = self
                    .backend
                    .remote
                    .api_key
                    .as_deref()
                    .is_some_and(|k| !k.trim().is_empty());
                if !has_key {
                    let err = ConfigError::MissingCredential("HUGGINGFACE_API_KEY".to_string());
                    log_validation!(failure, "configuration", error = err);
                    return Err(err);
                }
            }
            BackendKind::Local => {
                let path = self.backend.local.model_path();
                if !path.exists() {
                    let err = ConfigError::MissingModelPath(path.display().to_string());
                    log_validation!(failure, "configuration", error = err);
                    return Err(err);
                }
            }
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PORT".to_string(),
                value: "0".to_string(),
            });
        }

        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "GENERATION_MAX_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }

        if self.consistency.num_inferences == 0 || self.consistency.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CONSISTENCY_INFERENCES/CONSISTENCY_CONCURRENCY".to_string(),
                value: "0".to_string(),
            });
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().contains(level))
        {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl BackendConfig {
    fn from_source(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let kind_str = lookup("TUTOR_BACKEND").unwrap_or_else(|| "remote".to_string());
        let kind = match kind_str.to_lowercase().as_str() {
            "local" | "llama" | "llama.cpp" => BackendKind::Local,
            "remote" | "api" | "huggingface" | "hf" => BackendKind::Remote,
            _ => {
                info!("Unknown backend '{}', defaulting to remote inference", kind_str);
                BackendKind::Remote
            }
        };

        let prompt_format = match lookup("PROMPT_FORMAT") {
            Some(value) => value.parse::<PromptFormat>().map_err(|_| ConfigError::InvalidValue {
                name: "PROMPT_FORMAT".to_string(),
                value,
            })?,
            None => match kind {
                BackendKind::Remote => PromptFormat::Plain,
                BackendKind::Local => PromptFormat::Llama3Chat,
            },
        };

        Ok(BackendConfig {
            kind,
            prompt_format,
            remote: RemoteConfig {
                api_url: lookup("INFERENCE_API_URL")
                    .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
                api_key: lookup("HUGGINGFACE_API_KEY").filter(|k| !k.trim().is_empty()),
                timeout_secs: parse_or(lookup, "INFERENCE_TIMEOUT_SECS", 60)?,
                forward_parameters: parse_or(lookup, "INFERENCE_FORWARD_PARAMETERS", false)?,
            },
            local: LocalConfig {
                model_id: lookup("LOCAL_MODEL_ID").unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
                cache_dir: lookup("MODEL_CACHE_DIR"),
                gpu_layers: parse_or(lookup, "LOCAL_GPU_LAYERS", 1000)?,
                context_size: parse_or(lookup, "LOCAL_CONTEXT_SIZE", 4096)?,
            },
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_map(&values)
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("hf_1234567890abcdef"), "hf_1***cdef");
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.backend.prompt_format, PromptFormat::Plain);
        assert_eq!(config.backend.remote.api_url, DEFAULT_INFERENCE_URL);
        assert_eq!(config.backend.remote.timeout_secs, 60);
        assert!(!config.backend.remote.forward_parameters);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.consistency.num_inferences, 10);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_backend_parsing() {
        let test_cases = vec![
            ("remote", BackendKind::Remote),
            ("HuggingFace", BackendKind::Remote),
            ("local", BackendKind::Local),
            ("LLAMA", BackendKind::Local),
            ("unknown", BackendKind::Remote),
        ];

        for (input, expected) in test_cases {
            let config = config_with(&[("TUTOR_BACKEND", input)]).unwrap();
            assert_eq!(config.backend.kind, expected, "Input '{}' should map to {:?}", input, expected);
        }
    }

    #[test]
    fn test_local_backend_defaults_to_llama3_prompts() {
        let config = config_with(&[("TUTOR_BACKEND", "local")]).unwrap();
        assert_eq!(config.backend.prompt_format, PromptFormat::Llama3Chat);

        let config = config_with(&[("TUTOR_BACKEND", "local"), ("PROMPT_FORMAT", "plain")]).unwrap();
        assert_eq!(config.backend.prompt_format, PromptFormat::Plain);
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let config = config_with(&[("TUTOR_BACKEND", "remote")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredential(_))));

        let config = config_with(&[("HUGGINGFACE_API_KEY", "   ")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredential(_))));

        let config = config_with(&[("HUGGINGFACE_API_KEY", "hf_test_key")]).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_model_path_is_fatal() {
        let config = config_with(&[
            ("TUTOR_BACKEND", "local"),
            ("MODEL_CACHE_DIR", "/nonexistent/models"),
        ])
        .unwrap();
        assert_eq!(
            config.backend.local.model_path(),
            PathBuf::from("/nonexistent/models").join(DEFAULT_LOCAL_MODEL)
        );
        assert!(matches!(config.validate(), Err(ConfigError::MissingModelPath(_))));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let result = config_with(&[("PORT", "not-a-number")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = config_with(&[("CONSISTENCY_INFERENCES", "-1")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let config = config_with(&[("HUGGINGFACE_API_KEY", "hf_key"), ("GENERATION_MAX_ATTEMPTS", "0")])
            .unwrap();
        assert!(config.validate().is_err());
    }
}
