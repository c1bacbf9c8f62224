//! Bridge protocol
//!
//! Typed request/response messages exchanged with the UI process. Every
//! operation has its own tagged shape, validated at this boundary before it
//! reaches the engine; field names are camelCase on the wire because the
//! consumer is a JavaScript UI.
//!
//! Requests arrive wrapped in a [`RequestEnvelope`] carrying a correlation
//! id. Every response and stream event echoes that id so the delivery
//! channel can match (and deduplicate) messages per request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to load a GGUF model. Omitted fields fall back to the engine's
/// retained configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModelRequest {
    /// Path to the GGUF file
    pub model_path: String,
    /// Number of layers to offload to GPU (0 = CPU only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_layers: Option<u32>,
    /// Context window size in tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u32>,
    /// Decode batch size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    /// Default sampling temperature for this model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Default nucleus sampling threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Default top-k sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

/// Outcome of a load request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModelResponse {
    pub success: bool,
    pub message: String,
}

impl LoadModelResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A generation request, shared by the one-shot and streaming forms.
///
/// Sampling overrides apply to this call only and fall back to the loaded
/// model's defaults when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// The user prompt
    pub prompt: String,
    /// Extra context prepended to the prompt for this turn only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Advisory model name; the loaded model serves every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Cap on generated tokens for this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// System instruction placed ahead of the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl GenerateRequest {
    /// A request carrying only a prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            model: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// Result of a one-shot generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// The primary payload: the first fenced code block, or the raw output
    /// when the model produced no fence
    pub code: String,
    /// Prose surrounding the fenced block; empty when the output was code only
    pub explanation: String,
    /// Number of tokens generated
    pub tokens: u32,
    /// Wall-clock generation time in milliseconds
    #[serde(rename = "generationTime")]
    pub generation_time_ms: u64,
    /// Language tag of the fenced block, when one was present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One event in a streaming generation.
///
/// A stream emits exactly one `Start`, then zero or more `Chunk`s, then
/// exactly one `End` or `Error`, and nothing after that. Chunk boundaries
/// are arbitrary: consumers concatenate chunk text and must never parse a
/// chunk for token or word boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Generation accepted; echoes the request so the consumer can correlate
    Start { request: GenerateRequest },
    /// An ordered fragment of output text
    Chunk { text: String },
    /// Successful completion
    #[serde(rename_all = "camelCase")]
    End {
        tokens: u32,
        #[serde(rename = "generationTime")]
        generation_time_ms: u64,
        /// Sum of the emitted chunk lengths in bytes
        total_length: u64,
    },
    /// Terminal failure. `cancelled` distinguishes a user-initiated stop
    /// from a real fault so the UI can present it as a neutral outcome.
    Error { message: String, cancelled: bool },
}

impl StreamEvent {
    pub fn start(request: GenerateRequest) -> Self {
        StreamEvent::Start { request }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        StreamEvent::Chunk { text: text.into() }
    }

    pub fn end(tokens: u32, generation_time_ms: u64, total_length: u64) -> Self {
        StreamEvent::End {
            tokens,
            generation_time_ms,
            total_length,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            cancelled: false,
        }
    }

    /// The terminal event for a user-initiated cancellation
    pub fn stopped() -> Self {
        StreamEvent::Error {
            message: "generation stopped".to_string(),
            cancelled: true,
        }
    }

    /// True for `End` and `Error`; nothing follows a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End { .. } | StreamEvent::Error { .. })
    }
}

/// Loaded-state query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

/// One entry in the model registry listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListing {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Model registry listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelListing>,
}

/// Request-level failure (bad input, engine error on the one-shot form)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
}

/// Every operation the bridge accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Load(LoadModelRequest),
    Generate(GenerateRequest),
    GenerateStream(GenerateRequest),
    Cancel,
    Status,
    ListModels,
}

/// A request line from the UI process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id echoed on every message produced for this request
    pub id: Uuid,
    #[serde(flatten)]
    pub request: Request,
}

/// Every message the bridge emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Load(LoadModelResponse),
    Generate(GenerateResponse),
    Status(StatusResponse),
    Models(ModelsResponse),
    Stream(StreamEvent),
    Error(ErrorResponse),
}

/// A response line to the UI process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request this message belongs to; absent only when the
    /// request line itself could not be parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(flatten)]
    pub response: Response,
}
