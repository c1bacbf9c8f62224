//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and
//! generation, plus the session, cancellation and post-processing pieces
//! around it.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod extract;
pub mod model;
pub mod session;
pub(crate) mod streaming;

// Re-export main types for convenience
pub use cancel::CancelToken;
pub use config::{GenerationParams, ModelConfig, ModelConfigPatch};
pub use engine::{Engine, EngineError, GenerationResult, LoadedModelInfo};
pub use extract::{extract_code_block, split_response, ExtractedCode, ResponseParts};
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
pub use session::ChatSession;
