use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::errors::BackendError;
use crate::llm_providers::GenerationParams;

// Import logging macros
use crate::log_llm_operation;

/// Where a loaded model ended up running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Gpu,
    Cpu,
}

/// A loaded causal language model. Calls are blocking and need exclusive access.
pub trait CausalLm: Send {
    /// Sample `params.num_sequences` continuations of `prompt`.
    fn generate_sequences(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError>;

    fn device(&self) -> ComputeDevice;
}

/// Knows how to bring a model into memory. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn CausalLm>, BackendError>;

    fn model_name(&self) -> &str;
}

type SharedModel = Arc<Mutex<Box<dyn CausalLm>>>;

/// In-process generation over a lazily loaded, memoized model.
#[derive(Clone)]
pub struct LocalBackend {
    loader: Arc<dyn ModelLoader>,
    model: Arc<OnceCell<SharedModel>>,
}

impl fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBackend")
            .field("model", &self.loader.model_name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

static SPECIAL_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|[A-Za-z0-9_]+\|>|</?s>").expect("special token pattern is valid")
});

/// Remove chat-template control tokens that slipped into decoded text.
pub fn strip_special_tokens(text: &str) -> String {
    SPECIAL_TOKEN_RE.replace_all(text, "").trim().to_string()
}

impl LocalBackend {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<SharedModel, BackendError> {
        self.model
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                info!(model = %loader.model_name(), "Loading local model");
                let started = Instant::now();

                let model = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| BackendError::ModelLoad(format!("load task aborted: {}", e)))??;

                info!(
                    model = %self.loader.model_name(),
                    device = ?model.device(),
                    load_ms = started.elapsed().as_millis() as u64,
                    "Local model loaded"
                );
                Ok::<_, BackendError>(Arc::new(Mutex::new(model)))
            })
            .await
            .cloned()
    }

    /// Load on first use, then run one exclusive generation on the blocking pool.
    pub async fn generate_sequences(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        let model = self.model().await.inspect_err(|e| {
            log_llm_operation!(error, "load_model", backend = self.backend_name(), error = e);
        })?;

        log_llm_operation!(start, "generate", backend = self.backend_name(), prompt_length = prompt.len());
        let started = Instant::now();

        let prompt = prompt.to_owned();
        let params = params.clone();
        let sequences = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| BackendError::Inference("model lock poisoned by an earlier panic".to_string()))?;
            guard.generate_sequences(&prompt, &params)
        })
        .await
        .map_err(|e| BackendError::Inference(format!("generation task aborted: {}", e)))?
        .inspect_err(|e| {
            log_llm_operation!(error, "generate", backend = self.backend_name(), error = e);
        })?;

        let sequences: Vec<String> = sequences.iter().map(|s| strip_special_tokens(s)).collect();
        log_llm_operation!(
            success,
            "generate",
            backend = self.backend_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            response_length = sequences.iter().map(String::len).sum::<usize>()
        );
        Ok(sequences)
    }

    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let mut sequences = self.generate_sequences(prompt, params).await?;
        if sequences.is_empty() {
            warn!(backend = self.backend_name(), "Model returned no sequences");
            return Err(BackendError::Inference("model returned no sequences".to_string()));
        }
        Ok(sequences.swap_remove(0))
    }

    pub fn backend_name(&self) -> &'static str {
        "local"
    }

    pub fn model_name(&self) -> &str {
        self.loader.model_name()
    }
}

#[cfg(feature = "llama")]
pub use llama::{LlamaCppLoader, LlamaCppModel};

#[cfg(feature = "llama")]
mod llama {
    use std::num::NonZeroU32;
    use std::time::{SystemTime, UNIX_EPOCH};

    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaModel, Special};
    use encoding_rs::{CoderResult, Decoder};
    use llama_cpp_2::sampling::LlamaSampler;
    use tracing::{info, warn};

    use super::{CausalLm, ComputeDevice, ModelLoader};
    use crate::config::LocalConfig;
    use crate::errors::BackendError;
    use crate::llm_providers::GenerationParams;

    fn inference_error(e: impl std::fmt::Display) -> BackendError {
        BackendError::Inference(e.to_string())
    }

    /// Decodes one token's bytes. A character split across tokens is held by
    /// the decoder until its remaining bytes arrive; `last` flushes it.
    fn decode_piece(decoder: &mut Decoder, bytes: &[u8], last: bool) -> Result<String, BackendError> {
        let capacity = decoder
            .max_utf8_buffer_length(bytes.len())
            .ok_or_else(|| BackendError::Inference("token too large to decode".to_string()))?;
        let mut piece = String::with_capacity(capacity);
        let (result, read, _) = decoder.decode_to_string(bytes, &mut piece, last);
        match result {
            CoderResult::InputEmpty => Ok(piece),
            CoderResult::OutputFull => Err(BackendError::Inference(format!(
                "token decoding stopped after {} of {} bytes",
                read,
                bytes.len()
            ))),
        }
    }

    /// Loads a GGUF model file through llama.cpp, offloading to the GPU when it can.
    pub struct LlamaCppLoader {
        config: LocalConfig,
        name: String,
    }

    impl LlamaCppLoader {
        pub fn new(config: LocalConfig) -> Self {
            let name = config.model_path().display().to_string();
            Self { config, name }
        }
    }

    impl ModelLoader for LlamaCppLoader {
        fn load(&self) -> Result<Box<dyn CausalLm>, BackendError> {
            let path = self.config.model_path();
            if !path.exists() {
                return Err(BackendError::ModelLoad(format!(
                    "model file '{}' does not exist",
                    path.display()
                )));
            }

            let backend = LlamaBackend::init().map_err(|e| BackendError::ModelLoad(e.to_string()))?;

            let gpu_params = LlamaModelParams::default().with_n_gpu_layers(self.config.gpu_layers);
            let (model, device) = match LlamaModel::load_from_file(&backend, &path, &gpu_params) {
                Ok(model) if self.config.gpu_layers > 0 => (model, ComputeDevice::Gpu),
                Ok(model) => (model, ComputeDevice::Cpu),
                Err(e) => {
                    warn!(error = %e, "GPU offload failed, loading model on CPU");
                    let cpu_params = LlamaModelParams::default().with_n_gpu_layers(0);
                    let model = LlamaModel::load_from_file(&backend, &path, &cpu_params)
                        .map_err(|e| BackendError::ModelLoad(e.to_string()))?;
                    (model, ComputeDevice::Cpu)
                }
            };

            info!(path = %path.display(), device = ?device, "llama.cpp model ready");
            Ok(Box::new(LlamaCppModel {
                model,
                backend,
                device,
                context_size: self.config.context_size,
            }))
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }

    // Field order matters: the model is dropped before the backend is freed
    pub struct LlamaCppModel {
        model: LlamaModel,
        backend: LlamaBackend,
        device: ComputeDevice,
        context_size: u32,
    }

    impl LlamaCppModel {
        fn sample_once(&self, prompt: &str, params: &GenerationParams, seed: u32) -> Result<String, BackendError> {
            let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.context_size));
            let mut ctx = self
                .model
                .new_context(&self.backend, ctx_params)
                .map_err(inference_error)?;

            // Chat-formatted prompts already carry their own BOS token
            let add_bos = if prompt.starts_with("<|begin_of_text|>") {
                AddBos::Never
            } else {
                AddBos::Always
            };
            let tokens = self.model.str_to_token(prompt, add_bos).map_err(inference_error)?;
            if tokens.is_empty() {
                return Err(BackendError::Inference("prompt produced no tokens".to_string()));
            }
            if tokens.len() + params.max_new_tokens as usize > self.context_size as usize {
                return Err(BackendError::Inference(format!(
                    "prompt of {} tokens does not fit a {} token context",
                    tokens.len(),
                    self.context_size
                )));
            }

            let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
            let last_idx = (tokens.len() - 1) as i32;
            for (i, token) in tokens.iter().enumerate() {
                batch
                    .add(*token, i as i32, &[0], i as i32 == last_idx)
                    .map_err(inference_error)?;
            }
            ctx.decode(&mut batch).map_err(inference_error)?;

            let mut sampler = if params.do_sample {
                LlamaSampler::chain_simple([
                    LlamaSampler::top_p(params.top_p, 1),
                    LlamaSampler::temp(params.temperature),
                    LlamaSampler::dist(seed),
                ])
            } else {
                LlamaSampler::greedy()
            };

            let mut decoder = encoding_rs::UTF_8.new_decoder();
            let mut output = String::new();
            let mut n_cur = batch.n_tokens();

            for _ in 0..params.max_new_tokens {
                let token = sampler.sample(&ctx, batch.n_tokens() - 1);
                sampler.accept(token);
                if self.model.is_eog_token(token) {
                    break;
                }

                // Plaintext rendering drops special tokens
                let bytes = self
                    .model
                    .token_to_bytes(token, Special::Plaintext)
                    .map_err(inference_error)?;
                output.push_str(&decode_piece(&mut decoder, &bytes, false)?);

                batch.clear();
                batch.add(token, n_cur, &[0], true).map_err(inference_error)?;
                ctx.decode(&mut batch).map_err(inference_error)?;
                n_cur += 1;
            }

            output.push_str(&decode_piece(&mut decoder, &[], true)?);
            Ok(output)
        }
    }

    impl CausalLm for LlamaCppModel {
        fn generate_sequences(
            &mut self,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<Vec<String>, BackendError> {
            let base_seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let base_seed = (base_seed ^ (base_seed >> 32)) as u32;

            (0..params.num_sequences.max(1))
                .map(|i| self.sample_once(prompt, params, base_seed.wrapping_add(i)))
                .collect()
        }

        fn device(&self) -> ComputeDevice {
            self.device
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoModel {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl CausalLm for EchoModel {
        fn generate_sequences(
            &mut self,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<Vec<String>, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok((0..params.num_sequences)
                .map(|i| format!("{} #{}<|eot_id|>", prompt, i))
                .collect())
        }

        fn device(&self) -> ComputeDevice {
            ComputeDevice::Cpu
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> Result<Box<dyn CausalLm>, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoModel {
                in_flight: Arc::clone(&self.in_flight),
                max_in_flight: Arc::clone(&self.max_in_flight),
            }))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct FailingLoader;

    impl ModelLoader for FailingLoader {
        fn load(&self) -> Result<Box<dyn CausalLm>, BackendError> {
            Err(BackendError::ModelLoad("out of memory".to_string()))
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_strip_special_tokens() {
        assert_eq!(strip_special_tokens("Answer: B<|eot_id|>"), "Answer: B");
        assert_eq!(
            strip_special_tokens("<|start_header_id|>assistant<|end_header_id|>\n\nAnswer: C"),
            "assistant\n\nAnswer: C"
        );
        assert_eq!(strip_special_tokens("<s>Question: x</s>"), "Question: x");
        assert_eq!(strip_special_tokens("A) 3 < 4 | 5 > 2"), "A) 3 < 4 | 5 > 2");
    }

    #[tokio::test]
    async fn test_model_is_loaded_once_and_reused() {
        let loader = Arc::new(CountingLoader::default());
        let backend = LocalBackend::new(loader.clone());
        assert!(!backend.is_loaded());

        let params = GenerationParams::default();
        let first = backend.generate("hello", &params).await.unwrap();
        let second = backend.generate("again", &params).await.unwrap();

        assert_eq!(first, "hello #0");
        assert_eq!(second, "again #0");
        assert!(backend.is_loaded());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_one_model_exclusively() {
        let loader = Arc::new(CountingLoader::default());
        let backend = LocalBackend::new(loader.clone());
        let params = GenerationParams::default();

        let calls = (0..8).map(|i| {
            let backend = backend.clone();
            let params = params.clone();
            tokio::spawn(async move { backend.generate(&format!("p{}", i), &params).await })
        });
        for handle in futures_util::future::join_all(calls).await {
            assert!(handle.unwrap().is_ok());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multiple_sequences() {
        let backend = LocalBackend::new(Arc::new(CountingLoader::default()));
        let params = GenerationParams {
            num_sequences: 3,
            ..GenerationParams::default()
        };

        let sequences = backend.generate_sequences("q", &params).await.unwrap();
        assert_eq!(sequences, vec!["q #0", "q #1", "q #2"]);
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let backend = LocalBackend::new(Arc::new(FailingLoader));
        let result = backend.generate("hello", &GenerationParams::default()).await;

        assert!(matches!(result, Err(BackendError::ModelLoad(_))));
        assert!(!backend.is_loaded());
    }
}
