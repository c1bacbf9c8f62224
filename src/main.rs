//! Transport bridge
//!
//! Line-delimited JSON over stdio between the UI process and the engine.
//! Each stdin line is a [`RequestEnvelope`]; every response and stream event
//! is written as a [`ResponseEnvelope`] line carrying the request's id, all
//! through a single writer so output stays in order. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing_subscriber::EnvFilter;

use codeloom::inference::{Engine, ModelConfigPatch};
use codeloom::protocol::{
    ErrorResponse, GenerateRequest, LoadModelRequest, LoadModelResponse, ModelListing,
    ModelsResponse, Request, RequestEnvelope, Response, ResponseEnvelope, StatusResponse,
};
use codeloom::storage::models::scan_models_directory;
use codeloom::storage::settings::{load_settings, EngineSettings};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("codeloom=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = load_settings();
    let engine = Arc::new(Engine::new());
    // Persisted defaults become the engine's retained configuration; load
    // requests override it field by field.
    engine.update_config(settings_patch(&settings));
    let (out_tx, mut out_rx) = unbounded_channel::<ResponseEnvelope>();

    // Single writer keeps response lines whole and in order
    let writer = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let stdout = std::io::stdout();
        while let Some(envelope) = out_rx.blocking_recv() {
            match serde_json::to_string(&envelope) {
                Ok(line) => {
                    let mut handle = stdout.lock();
                    if writeln!(handle, "{line}").and_then(|_| handle.flush()).is_err() {
                        tracing::warn!("stdout closed, stopping writer");
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to encode response: {e}"),
            }
        }
    });

    tracing::info!("bridge ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope: RequestEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = out_tx.send(ResponseEnvelope {
                    id: None,
                    response: Response::Error(ErrorResponse {
                        message: format!("invalid request: {e}"),
                    }),
                });
                continue;
            }
        };
        dispatch(envelope, Arc::clone(&engine), settings.clone(), out_tx.clone());
    }

    tracing::info!("stdin closed, shutting down");
    drop(out_tx);
    let _ = writer.await;
}

fn dispatch(
    envelope: RequestEnvelope,
    engine: Arc<Engine>,
    settings: EngineSettings,
    out: UnboundedSender<ResponseEnvelope>,
) {
    let RequestEnvelope { id, request } = envelope;
    let id = Some(id);

    match request {
        Request::Load(request) => {
            tokio::task::spawn_blocking(move || {
                let response = handle_load(&engine, &request);
                let _ = out.send(ResponseEnvelope {
                    id,
                    response: Response::Load(response),
                });
            });
        }
        Request::Generate(request) => {
            tokio::task::spawn_blocking(move || {
                let response = match engine.generate(with_default_system(request, &settings)) {
                    Ok(result) => Response::Generate(result.into_response()),
                    Err(error) => Response::Error(ErrorResponse {
                        message: error.to_string(),
                    }),
                };
                let _ = out.send(ResponseEnvelope { id, response });
            });
        }
        Request::GenerateStream(request) => {
            let events = engine.generate_stream(with_default_system(request, &settings));
            tokio::task::spawn_blocking(move || {
                for event in events {
                    let _ = out.send(ResponseEnvelope {
                        id,
                        response: Response::Stream(event),
                    });
                }
            });
        }
        Request::Cancel => {
            // fire-and-forget, no response payload
            engine.cancel();
        }
        Request::Status => {
            let _ = out.send(ResponseEnvelope {
                id,
                response: Response::Status(StatusResponse {
                    loaded: engine.is_loaded(),
                    model_path: engine.model_info().map(|info| info.path),
                }),
            });
        }
        Request::ListModels => {
            tokio::task::spawn_blocking(move || {
                let response = match scan_models_directory(&settings.models_directory) {
                    Ok(models) => Response::Models(ModelsResponse {
                        models: models
                            .into_iter()
                            .map(|model| ModelListing {
                                name: model.name,
                                path: model.path.display().to_string(),
                                size_bytes: model.size_bytes,
                            })
                            .collect(),
                    }),
                    Err(error) => Response::Error(ErrorResponse {
                        message: error.to_string(),
                    }),
                };
                let _ = out.send(ResponseEnvelope { id, response });
            });
        }
    }
}

/// Sampling and sizing defaults from the persisted settings
fn settings_patch(settings: &EngineSettings) -> ModelConfigPatch {
    ModelConfigPatch {
        model_path: None,
        gpu_layers: Some(settings.gpu_layers),
        context_size: Some(settings.context_size),
        batch_size: None,
        temperature: Some(settings.temperature),
        top_p: Some(settings.top_p),
        top_k: Some(settings.top_k),
        max_tokens: Some(settings.max_tokens),
    }
}

/// Build the load configuration from the engine's retained defaults plus the
/// request's overrides, then hand it to the engine.
fn handle_load(engine: &Engine, request: &LoadModelRequest) -> LoadModelResponse {
    if engine.is_loaded() {
        return LoadModelResponse::ok("model already loaded");
    }

    let mut config = engine.current_config();
    config.apply(ModelConfigPatch::from(request));

    match engine.initialize(config) {
        Ok(()) => {
            let message = engine
                .model_info()
                .map(|info| format!("Loaded {} ({} parameters)", info.path, info.param_count))
                .unwrap_or_else(|| "Model loaded".to_string());
            LoadModelResponse::ok(message)
        }
        Err(error) => LoadModelResponse::failure(error.to_string()),
    }
}

/// Fill in the persisted default system prompt when the request has none
fn with_default_system(mut request: GenerateRequest, settings: &EngineSettings) -> GenerateRequest {
    if request.system_prompt.is_none() && !settings.system_prompt.is_empty() {
        request.system_prompt = Some(settings.system_prompt.clone());
    }
    request
}
