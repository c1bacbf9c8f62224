//! Inference engine
//!
//! Core logic for managing the llama-cpp runtime and running generations.
//!
//! # Architecture
//!
//! Since llama-cpp-2 types (`LlamaBackend`, `LlamaModel`, `LlamaContext`)
//! contain raw pointers that are not `Send`, all model work runs on a
//! dedicated worker thread owned by the engine. The public [`Engine`] object
//! talks to it over a command channel, which also makes the engine
//! single-worker by construction: one generation runs at a time, and a
//! second request is rejected, never queued.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use thiserror::Error;

use crate::inference::cancel::CancelToken;
use crate::inference::config::{GenerationParams, ModelConfig, ModelConfigPatch};
use crate::inference::extract::{extract_code_block, split_response, ExtractedCode};
use crate::inference::model::{validate_gguf, ModelError};
use crate::inference::session::ChatSession;
use crate::inference::streaming::{OutputSink, Utf8Accumulator, STREAM_CHANNEL_CAPACITY};
use crate::protocol::{GenerateRequest, GenerateResponse, StreamEvent};

/// Generation contexts smaller than this are not worth creating
const CONTEXT_FLOOR: u32 = 2048;

/// Errors that can occur during engine operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("No model loaded")]
    NotLoaded,

    #[error("A generation is already in progress")]
    ConcurrentGeneration,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Inference worker unavailable: {0}")]
    Worker(String),
}

impl From<ModelError> for EngineError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::NotFound(path) => EngineError::ModelNotFound(path),
            other => EngineError::ModelLoad(other.to_string()),
        }
    }
}

/// Model information captured at load time
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    /// Path to the loaded model
    pub path: String,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Embedding dimension
    pub embedding_dim: i32,
    /// Training context length
    pub context_length: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model size in bytes
    pub size_bytes: u64,
}

/// Result of a completed one-shot generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Raw model output
    pub text: String,
    /// First fenced code block, when the output carried one
    pub extracted: Option<ExtractedCode>,
    /// Exact number of tokens generated
    pub tokens: u32,
    /// Wall-clock time of the generation
    pub duration: Duration,
}

impl GenerationResult {
    /// Shape the result for the boundary contract
    pub fn into_response(self) -> GenerateResponse {
        let parts = split_response(&self.text);
        GenerateResponse {
            code: parts.code,
            explanation: parts.explanation,
            tokens: self.tokens,
            generation_time_ms: self.duration.as_millis() as u64,
            language: parts.language,
        }
    }
}

/// Releases the single in-flight generation slot when dropped
struct FlightGuard {
    slot: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::SeqCst);
    }
}

/// A generation request after acceptance: effective parameters resolved,
/// cancellation reset, flight slot held
struct PreparedGeneration {
    prompt: String,
    system_prompt: Option<String>,
    params: GenerationParams,
    cancel: CancelToken,
    guard: FlightGuard,
}

/// How the result of a generation is delivered
enum GenerationMode {
    Blocking {
        reply: mpsc::Sender<Result<GenerationResult, EngineError>>,
    },
    Streaming {
        events: mpsc::SyncSender<StreamEvent>,
    },
}

/// Commands sent to the worker thread
enum WorkerCommand {
    Load {
        config: ModelConfig,
        reply: mpsc::Sender<Result<LoadedModelInfo, EngineError>>,
    },
    Unload,
    Generate {
        prepared: PreparedGeneration,
        mode: GenerationMode,
    },
    Shutdown,
}

/// The worker thread's loaded-model state
struct LoadedModel {
    model: LlamaModel,
}

/// The inference engine: one loaded model, one chat session, one generation
/// at a time.
///
/// Explicitly constructed and owned by its host; a process normally holds
/// exactly one, but tests are free to create as many as they like.
pub struct Engine {
    command_tx: Mutex<mpsc::Sender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
    loaded: AtomicBool,
    in_flight: Arc<AtomicBool>,
    cancel: CancelToken,
    retained: Mutex<ModelConfig>,
    active: Mutex<Option<ModelConfig>>,
    model_info: Mutex<Option<LoadedModelInfo>>,
}

impl Engine {
    /// Create an engine in the unloaded state and start its worker thread
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        let worker = thread::spawn(move || worker_main(command_rx));
        tracing::debug!("inference worker thread started");

        Self {
            command_tx: Mutex::new(command_tx),
            worker: Some(worker),
            loaded: AtomicBool::new(false),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
            retained: Mutex::new(ModelConfig::default()),
            active: Mutex::new(None),
            model_info: Mutex::new(None),
        }
    }

    /// Load a model.
    ///
    /// Idempotent: a no-op when a model is already loaded (it does not
    /// reload). Validates the path, the GGUF header and the size fields
    /// before any runtime work; sampling defaults are clamped into range.
    /// On failure the engine stays unloaded with no partial state. The
    /// accepted configuration becomes both the active sampling defaults and
    /// the retained base that [`Engine::update_config`] patches for the
    /// next load.
    pub fn initialize(&self, mut config: ModelConfig) -> Result<(), EngineError> {
        if self.loaded.load(Ordering::SeqCst) {
            tracing::debug!("model already loaded, initialize is a no-op");
            return Ok(());
        }

        if config.context_size == 0 || config.batch_size == 0 || config.max_tokens == 0 {
            return Err(EngineError::ModelLoad(
                "context_size, batch_size and max_tokens must be non-zero".to_string(),
            ));
        }
        config.clamp_sampling();

        let metadata = validate_gguf(&config.model_path)?;
        tracing::debug!(
            version = metadata.version,
            tensors = metadata.tensor_count,
            size_bytes = metadata.size_bytes,
            "gguf validation passed"
        );

        let (reply_tx, reply_rx) = mpsc::channel();
        let command = WorkerCommand::Load {
            config: config.clone(),
            reply: reply_tx,
        };
        if self.dispatch(command).is_err() {
            return Err(EngineError::Worker("inference worker is not running".into()));
        }
        let info = match reply_rx.recv() {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Worker(
                    "inference worker dropped the load request".into(),
                ))
            }
        };

        *lock(&self.model_info) = Some(info);
        *lock(&self.active) = Some(config.clone());
        *lock(&self.retained) = config;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// True when a model is loaded and generation may be requested
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Information about the currently loaded model
    pub fn model_info(&self) -> Option<LoadedModelInfo> {
        lock(&self.model_info).clone()
    }

    /// Snapshot of the configuration the next load will use
    pub fn current_config(&self) -> ModelConfig {
        lock(&self.retained).clone()
    }

    /// Merge a partial configuration for use by the next load.
    ///
    /// Never affects an already-loaded model or an in-flight generation's
    /// captured parameters.
    pub fn update_config(&self, patch: ModelConfigPatch) {
        let mut retained = lock(&self.retained);
        retained.apply(patch);
        tracing::debug!(config = ?*retained, "retained configuration updated for the next load");
    }

    /// Unload the current model and clear the chat session.
    ///
    /// Safe to call when nothing is loaded and never fails: problems during
    /// disposal are logged and swallowed so shutdown cannot be blocked.
    pub fn unload(&self) {
        if !self.loaded.swap(false, Ordering::SeqCst) {
            tracing::debug!("unload with no model loaded, nothing to do");
            return;
        }
        *lock(&self.model_info) = None;
        *lock(&self.active) = None;
        if self.dispatch(WorkerCommand::Unload).is_err() {
            tracing::warn!("inference worker is not running, nothing to release");
        }
        tracing::info!("model unload requested");
    }

    /// Run a generation to completion and return the full result.
    ///
    /// Fails with [`EngineError::NotLoaded`] before any model work when no
    /// model is ready, and with [`EngineError::ConcurrentGeneration`] when a
    /// generation of either form is already in flight. A successful call
    /// appends its turns to the chat session.
    pub fn generate(&self, request: GenerateRequest) -> Result<GenerationResult, EngineError> {
        let prepared = self.accept(&request)?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let command = WorkerCommand::Generate {
            prepared,
            mode: GenerationMode::Blocking { reply: reply_tx },
        };
        if self.dispatch(command).is_err() {
            return Err(EngineError::Worker("inference worker is not running".into()));
        }

        match reply_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(EngineError::Worker(
                "inference worker dropped the request".into(),
            )),
        }
    }

    /// Run a generation as an ordered event stream.
    ///
    /// Always returns a receiver. On acceptance the first event is `Start`,
    /// followed by `Chunk`s and exactly one terminal `End` or `Error`;
    /// rejection is a single terminal `Error` event, so the first event a
    /// consumer sees is always informative. The channel is bounded, so a
    /// slow consumer suspends the producer rather than buffering without
    /// limit. Each call produces a fresh, non-restartable sequence.
    pub fn generate_stream(&self, request: GenerateRequest) -> Receiver<StreamEvent> {
        let (tx, rx) = mpsc::sync_channel(STREAM_CHANNEL_CAPACITY);

        let prepared = match self.accept(&request) {
            Ok(prepared) => prepared,
            Err(error) => {
                let _ = tx.send(event_for_error(&error));
                return rx;
            }
        };

        let _ = tx.send(StreamEvent::start(request));

        let command = WorkerCommand::Generate {
            prepared,
            mode: GenerationMode::Streaming { events: tx },
        };
        if let Err(WorkerCommand::Generate {
            mode: GenerationMode::Streaming { events },
            ..
        }) = self.dispatch(command)
        {
            let _ = events.send(StreamEvent::failure("inference worker is not running"));
        }

        rx
    }

    /// Request cancellation of the in-flight generation, if any.
    ///
    /// Fire-and-forget: the generation observes the flag at its next
    /// checkpoint and terminates itself. A no-op when nothing is in flight.
    pub fn cancel(&self) {
        if self.in_flight.load(Ordering::SeqCst) {
            self.cancel.trigger();
            tracing::debug!("cancellation requested");
        } else {
            tracing::debug!("cancel with no generation in flight, ignoring");
        }
    }

    /// A handle the host can use to cancel without holding the engine
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Admission control shared by both request shapes: loaded check,
    /// single-flight reservation, parameter resolution, cancellation reset.
    fn accept(&self, request: &GenerateRequest) -> Result<PreparedGeneration, EngineError> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(EngineError::NotLoaded);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::ConcurrentGeneration);
        }
        let guard = FlightGuard {
            slot: Arc::clone(&self.in_flight),
        };

        let defaults = match lock(&self.active).clone() {
            Some(config) => config,
            None => return Err(EngineError::NotLoaded),
        };
        self.cancel.reset();
        let params = GenerationParams::resolve(&defaults, request);

        if let Some(model) = &request.model {
            tracing::debug!(%model, "per-request model hint ignored; the loaded model serves all requests");
        }

        let prompt = match request.context.as_deref() {
            Some(context) if !context.trim().is_empty() => {
                format!("{context}\n\n{}", request.prompt)
            }
            _ => request.prompt.clone(),
        };

        Ok(PreparedGeneration {
            prompt,
            system_prompt: request.system_prompt.clone(),
            params,
            cancel: self.cancel.clone(),
            guard,
        })
    }

    fn dispatch(&self, command: WorkerCommand) -> Result<(), WorkerCommand> {
        lock(&self.command_tx)
            .send(command)
            .map_err(|mpsc::SendError(command)| command)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.dispatch(WorkerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// A poisoned lock only means a panicked holder; the guarded state is plain
/// data, safe to reuse.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn event_for_error(error: &EngineError) -> StreamEvent {
    if matches!(error, EngineError::Cancelled) {
        StreamEvent::stopped()
    } else {
        StreamEvent::failure(error.to_string())
    }
}

/// Worker thread main loop.
///
/// Owns the backend, the model and the chat session; processes commands
/// sequentially.
fn worker_main(commands: mpsc::Receiver<WorkerCommand>) {
    let mut backend: Option<LlamaBackend> = None;
    let mut loaded: Option<LoadedModel> = None;
    let mut session = ChatSession::new();

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Load { config, reply } => match load_model(&mut backend, &config) {
                Ok((model, info)) => {
                    loaded = Some(LoadedModel { model });
                    session.clear();
                    tracing::info!(path = %info.path, params = info.param_count, "model loaded");
                    let _ = reply.send(Ok(info));
                }
                Err(error) => {
                    tracing::error!("model load failed: {error}");
                    let _ = reply.send(Err(error));
                }
            },
            WorkerCommand::Unload => {
                // model first, then the conversational state
                if loaded.take().is_some() {
                    tracing::info!("model released");
                }
                session.clear();
            }
            WorkerCommand::Generate { prepared, mode } => {
                match (backend.as_ref(), loaded.as_ref()) {
                    (Some(backend), Some(active)) => {
                        handle_generate(backend, active, &mut session, prepared, mode);
                    }
                    _ => {
                        // release the flight slot before the terminal message
                        drop(prepared);
                        reject(mode, EngineError::NotLoaded);
                    }
                }
            }
            WorkerCommand::Shutdown => {
                tracing::debug!("inference worker shutting down");
                break;
            }
        }
    }
}

fn reject(mode: GenerationMode, error: EngineError) {
    match mode {
        GenerationMode::Blocking { reply } => {
            let _ = reply.send(Err(error));
        }
        GenerationMode::Streaming { events } => {
            let _ = events.send(event_for_error(&error));
        }
    }
}

/// Initialize the backend on first use, then load the model and capture its
/// metadata.
fn load_model(
    backend: &mut Option<LlamaBackend>,
    config: &ModelConfig,
) -> Result<(LlamaModel, LoadedModelInfo), EngineError> {
    let backend_ref: &LlamaBackend = match backend {
        Some(existing) => existing,
        None => {
            let initialized = LlamaBackend::init()
                .map_err(|e| EngineError::ModelLoad(format!("backend init failed: {e}")))?;
            tracing::info!("llama backend initialized");
            backend.insert(initialized)
        }
    };

    let model_params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);
    let model = LlamaModel::load_from_file(backend_ref, &config.model_path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    let info = LoadedModelInfo {
        path: config.model_path.display().to_string(),
        vocab_size: model.n_vocab(),
        embedding_dim: model.n_embd(),
        context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
    };

    Ok((model, info))
}

/// Run one accepted generation and deliver its outcome.
///
/// The flight slot is released before the terminal message goes out, so a
/// caller woken by the result can immediately start the next generation.
fn handle_generate(
    backend: &LlamaBackend,
    active: &LoadedModel,
    session: &mut ChatSession,
    prepared: PreparedGeneration,
    mode: GenerationMode,
) {
    let PreparedGeneration {
        prompt,
        system_prompt,
        params,
        cancel,
        guard,
    } = prepared;
    let started = Instant::now();

    match mode {
        GenerationMode::Blocking { reply } => {
            let mut sink = OutputSink::collect();
            let outcome = run_generation(
                backend,
                &active.model,
                session,
                &prompt,
                system_prompt.as_deref(),
                &params,
                &cancel,
                &mut sink,
            );
            let result = outcome.map(|tokens| {
                let (text, _) = sink.finish();
                session.record_exchange(&prompt, &text);
                let extracted = extract_code_block(&text);
                GenerationResult {
                    text,
                    extracted,
                    tokens,
                    duration: started.elapsed(),
                }
            });
            drop(guard);
            if reply.send(result).is_err() {
                tracing::debug!("caller went away before receiving the generation result");
            }
        }
        GenerationMode::Streaming { events } => {
            let mut sink = OutputSink::stream(events.clone());
            let outcome = run_generation(
                backend,
                &active.model,
                session,
                &prompt,
                system_prompt.as_deref(),
                &params,
                &cancel,
                &mut sink,
            );
            match outcome {
                Ok(tokens) => {
                    let (text, total_length) = sink.finish();
                    session.record_exchange(&prompt, &text);
                    drop(guard);
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if events
                        .send(StreamEvent::end(tokens, elapsed_ms, total_length as u64))
                        .is_err()
                    {
                        tracing::debug!("stream consumer dropped before the end event");
                    }
                }
                Err(error) => {
                    drop(guard);
                    let _ = events.send(event_for_error(&error));
                }
            }
        }
    }
}

/// The generation loop shared by both request shapes.
///
/// Renders the conversation into a prompt, decodes it, then samples tokens
/// into the sink until end-of-generation, the token budget, or a
/// cancellation checkpoint. Returns the number of tokens generated.
#[allow(clippy::too_many_arguments)]
fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    session: &ChatSession,
    user_prompt: &str,
    system_prompt: Option<&str>,
    params: &GenerationParams,
    cancel: &CancelToken,
    sink: &mut OutputSink,
) -> Result<u32, EngineError> {
    let rendered = session.build_prompt(model, system_prompt, user_prompt);

    let n_ctx = params
        .context_size
        .min(model.n_ctx_train())
        .max(CONTEXT_FLOOR);
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(n_ctx))
        .with_n_batch(params.batch_size);
    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::Generation(format!("failed to create context: {e}")))?;

    let tokens = model
        .str_to_token(&rendered, AddBos::Always)
        .map_err(|e| EngineError::Generation(format!("tokenization failed: {e}")))?;
    tracing::debug!(prompt_tokens = tokens.len(), n_ctx, "starting generation");

    if tokens.len() as u32 >= n_ctx {
        return Err(EngineError::Generation(format!(
            "prompt needs {} tokens but the context window holds {}",
            tokens.len(),
            n_ctx
        )));
    }

    let mut batch = LlamaBatch::new(tokens.len().max(params.batch_size as usize), 1);
    for (i, token) in tokens.iter().enumerate() {
        let is_last = i == tokens.len() - 1;
        batch
            .add(*token, i as i32, &[0], is_last)
            .map_err(|e| EngineError::Generation(format!("failed to add token to batch: {e}")))?;
    }
    ctx.decode(&mut batch)
        .map_err(|e| EngineError::Generation(format!("prompt decode failed: {e}")))?;

    let mut sampler = if params.temperature < 0.01 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(params.top_k as i32),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(rand_seed()),
        ])
    };

    let mut utf8 = Utf8Accumulator::new();
    let mut n_decoded = tokens.len() as i32;
    let mut generated: u32 = 0;
    let budget = params.max_tokens.min(n_ctx - tokens.len() as u32);

    for _ in 0..budget {
        if cancel.is_cancelled() {
            tracing::debug!(generated, "generation cancelled");
            return Err(EngineError::Cancelled);
        }

        let token = sampler.sample(&ctx, batch.n_tokens() - 1);
        sampler.accept(token);

        if model.is_eog_token(token) {
            tracing::debug!("end of generation token encountered");
            break;
        }
        generated += 1;

        let bytes = model
            .token_to_bytes(token, Special::Tokenize)
            .map_err(|e| EngineError::Generation(format!("token decode failed: {e}")))?;
        if let Some(text) = utf8.push(&bytes) {
            if !sink.push(&text) {
                tracing::debug!("consumer went away, stopping generation early");
                break;
            }
        }

        batch.clear();
        batch
            .add(token, n_decoded, &[0], true)
            .map_err(|e| EngineError::Generation(format!("failed to add token to batch: {e}")))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Generation(format!("decode failed: {e}")))?;
        n_decoded += 1;
    }

    if let Some(rest) = utf8.flush() {
        sink.push(&rest);
    }

    Ok(generated)
}

/// Generates a random sampling seed from system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> GenerateRequest {
        GenerateRequest::from_prompt("hello")
    }

    /// Mark the engine loaded without a real model; the worker still has no
    /// weights, so anything that reaches it is rejected with `NotLoaded`.
    fn force_loaded(engine: &Engine) {
        engine.loaded.store(true, Ordering::SeqCst);
        *lock(&engine.active) = Some(ModelConfig::default());
    }

    #[test]
    fn test_engine_starts_unloaded() {
        let engine = Engine::new();
        assert!(!engine.is_loaded());
        assert!(engine.model_info().is_none());
    }

    #[test]
    fn test_generate_before_initialize_fails() {
        let engine = Engine::new();
        assert_eq!(engine.generate(request()), Err(EngineError::NotLoaded));
    }

    #[test]
    fn test_stream_before_initialize_emits_single_error() {
        let engine = Engine::new();
        let rx = engine.generate_stream(request());

        let first = rx.recv().expect("one event");
        assert!(matches!(
            first,
            StreamEvent::Error {
                cancelled: false,
                ..
            }
        ));
        assert!(rx.recv().is_err(), "nothing may follow a terminal event");
    }

    #[test]
    fn test_initialize_with_missing_file() {
        let engine = Engine::new();
        let config = ModelConfig::for_path("/nonexistent/model.gguf");
        assert!(matches!(
            engine.initialize(config),
            Err(EngineError::ModelNotFound(_))
        ));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_initialize_is_noop_when_loaded() {
        let engine = Engine::new();
        force_loaded(&engine);

        // the path is never even validated
        let config = ModelConfig::for_path("/nonexistent/model.gguf");
        assert_eq!(engine.initialize(config), Ok(()));
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_initialize_rejects_zero_sizes() {
        let engine = Engine::new();
        let config = ModelConfig {
            context_size: 0,
            ..ModelConfig::for_path("/nonexistent/model.gguf")
        };
        assert!(matches!(
            engine.initialize(config),
            Err(EngineError::ModelLoad(_))
        ));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_initialize_with_invalid_model_file() {
        use std::io::Write;
        let mut file = tempfile::Builder::new()
            .suffix(".gguf")
            .tempfile()
            .expect("create temp file");
        file.write_all(b"definitely not a gguf header")
            .expect("write temp file");

        let engine = Engine::new();
        let config = ModelConfig::for_path(file.path());
        assert!(matches!(
            engine.initialize(config),
            Err(EngineError::ModelLoad(_))
        ));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_unload_when_unloaded_is_noop() {
        let engine = Engine::new();
        engine.unload();
        engine.unload();
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_cancel_without_generation_is_ignored() {
        let engine = Engine::new();
        engine.cancel();
        assert!(!engine.cancel_token().is_cancelled());
    }

    #[test]
    fn test_update_config_merges_for_next_load() {
        let engine = Engine::new();
        engine.update_config(ModelConfigPatch {
            temperature: Some(0.1),
            gpu_layers: Some(16),
            ..Default::default()
        });

        let config = engine.current_config();
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.gpu_layers, 16);
        assert_eq!(config.context_size, ModelConfig::default().context_size);
    }

    #[test]
    fn test_concurrent_generation_rejected() {
        let engine = Engine::new();
        force_loaded(&engine);
        engine.in_flight.store(true, Ordering::SeqCst);

        assert_eq!(
            engine.generate(request()),
            Err(EngineError::ConcurrentGeneration)
        );

        let rx = engine.generate_stream(request());
        let first = rx.recv().expect("one event");
        match first {
            StreamEvent::Error { message, cancelled } => {
                assert!(!cancelled);
                assert!(message.contains("already in progress"));
            }
            other => panic!("expected an error event, got {other:?}"),
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_worker_rejects_generation_without_model() {
        let engine = Engine::new();
        force_loaded(&engine);

        assert_eq!(engine.generate(request()), Err(EngineError::NotLoaded));

        let rx = engine.generate_stream(request());
        let events: Vec<StreamEvent> = rx.iter().collect();
        assert_eq!(events.len(), 2, "start then one terminal event");
        assert!(matches!(events[0], StreamEvent::Start { .. }));
        assert!(matches!(
            events[1],
            StreamEvent::Error {
                cancelled: false,
                ..
            }
        ));
    }

    #[test]
    fn test_acceptance_resets_stale_cancellation() {
        let engine = Engine::new();
        force_loaded(&engine);

        engine.in_flight.store(true, Ordering::SeqCst);
        engine.cancel();
        assert!(engine.cancel_token().is_cancelled());
        engine.in_flight.store(false, Ordering::SeqCst);

        // rejected by the worker (no weights), but acceptance already reset
        // the stale flag
        let _ = engine.generate(request());
        assert!(!engine.cancel_token().is_cancelled());
    }

    #[test]
    fn test_flight_slot_released_after_rejection() {
        let engine = Engine::new();
        force_loaded(&engine);

        let _ = engine.generate(request());
        assert!(!engine.in_flight.load(Ordering::SeqCst));

        let rx = engine.generate_stream(request());
        let _: Vec<StreamEvent> = rx.iter().collect();
        // worker has dropped its sender, so the guard is gone too
        for _ in 0..50 {
            if !engine.in_flight.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!engine.in_flight.load(Ordering::SeqCst));
    }

    #[test]
    fn test_generation_result_into_response() {
        let result = GenerationResult {
            text: "Sure:\n```rust\nfn main() {}\n```\nDone.".to_string(),
            extracted: extract_code_block("Sure:\n```rust\nfn main() {}\n```\nDone."),
            tokens: 11,
            duration: Duration::from_millis(950),
        };

        let response = result.into_response();
        assert_eq!(response.code, "fn main() {}");
        assert_eq!(response.language.as_deref(), Some("rust"));
        assert_eq!(response.explanation, "Sure:\n\nDone.");
        assert_eq!(response.tokens, 11);
        assert_eq!(response.generation_time_ms, 950);
    }

    #[test]
    fn test_event_for_error_distinguishes_cancellation() {
        assert_eq!(event_for_error(&EngineError::Cancelled), StreamEvent::stopped());
        match event_for_error(&EngineError::Generation("boom".into())) {
            StreamEvent::Error { message, cancelled } => {
                assert!(!cancelled);
                assert!(message.contains("boom"));
            }
            other => panic!("expected an error event, got {other:?}"),
        }
    }
}
