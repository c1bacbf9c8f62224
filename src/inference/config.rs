//! Engine configuration
//!
//! Load-time model configuration and per-call sampling resolution.
//!
//! Out-of-range sampling values are clamped, never rejected: temperature to
//! `[0, 2]`, top-p to `[0, 1]`, and the token budget to the context window.

use std::path::PathBuf;

use crate::protocol::{GenerateRequest, LoadModelRequest};

/// Configuration for loading a model.
///
/// Supplied once per load; the sampling fields double as the session
/// defaults that per-call overrides fall back to. Size fields are validated
/// at load time (a zero context, batch or token budget fails the load).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Path to the GGUF file
    pub model_path: PathBuf,
    /// Number of layers to offload to GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window size in tokens
    pub context_size: u32,
    /// Decode batch size
    pub batch_size: u32,
    /// Default sampling temperature (0.0 = greedy)
    pub temperature: f32,
    /// Default top-p (nucleus) sampling threshold
    pub top_p: f32,
    /// Default top-k sampling parameter (0 = disabled)
    pub top_k: u32,
    /// Default cap on generated tokens per call
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            gpu_layers: 0,
            context_size: 4096,
            batch_size: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 4096,
        }
    }
}

impl ModelConfig {
    /// Default configuration pointed at `path`
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: path.into(),
            ..Self::default()
        }
    }

    /// Merge a patch into this configuration; `None` fields keep their
    /// current values
    pub fn apply(&mut self, patch: ModelConfigPatch) {
        if let Some(model_path) = patch.model_path {
            self.model_path = model_path;
        }
        if let Some(gpu_layers) = patch.gpu_layers {
            self.gpu_layers = gpu_layers;
        }
        if let Some(context_size) = patch.context_size {
            self.context_size = context_size;
        }
        if let Some(batch_size) = patch.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature;
        }
        if let Some(top_p) = patch.top_p {
            self.top_p = top_p;
        }
        if let Some(top_k) = patch.top_k {
            self.top_k = top_k;
        }
        if let Some(max_tokens) = patch.max_tokens {
            self.max_tokens = max_tokens;
        }
    }

    /// Clamp the sampling defaults into their documented ranges
    pub fn clamp_sampling(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
    }
}

/// Partial configuration merged into the retained [`ModelConfig`] for use by
/// the next load; never affects an already-loaded model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelConfigPatch {
    pub model_path: Option<PathBuf>,
    pub gpu_layers: Option<u32>,
    pub context_size: Option<u32>,
    pub batch_size: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
}

impl From<&LoadModelRequest> for ModelConfigPatch {
    fn from(request: &LoadModelRequest) -> Self {
        Self {
            model_path: Some(PathBuf::from(&request.model_path)),
            gpu_layers: request.gpu_layers,
            context_size: request.context_size,
            batch_size: request.batch_size,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_tokens: None,
        }
    }
}

/// Effective parameters for one generation: request overrides resolved
/// against the active configuration, then clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub context_size: u32,
    pub batch_size: u32,
}

impl GenerationParams {
    pub fn resolve(config: &ModelConfig, request: &GenerateRequest) -> Self {
        let context_size = config.context_size;
        let temperature = request
            .temperature
            .unwrap_or(config.temperature)
            .clamp(0.0, 2.0);
        let top_p = request.top_p.unwrap_or(config.top_p).clamp(0.0, 1.0);
        let top_k = request.top_k.unwrap_or(config.top_k);
        let max_tokens = request
            .max_tokens
            .unwrap_or(config.max_tokens)
            .clamp(1, context_size.max(1));

        Self {
            max_tokens,
            temperature,
            top_p,
            top_k,
            context_size,
            batch_size: config.batch_size,
        }
    }
}
