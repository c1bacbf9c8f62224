//! Settings storage
//!
//! Persisted engine defaults: sampling parameters, context size, GPU layers
//! and the models directory. The bridge seeds its load configuration from
//! these, and load requests override them field by field.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::{get_data_dir, StorageError};

/// Persisted engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Context window size
    pub context_size: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// System prompt used when a request carries none
    pub system_prompt: String,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Last loaded model path (for auto-loading on startup)
    #[serde(default)]
    pub last_model_path: Option<String>,
    /// Auto-load the last model on startup
    #[serde(default = "default_auto_load")]
    pub auto_load_model: bool,
}

fn default_auto_load() -> bool {
    true
}

/// Default system prompt from code, so it always matches the shipped version
pub fn default_system_prompt() -> String {
    "You are a careful coding assistant. When asked for code, reply with a \
     single fenced code block followed by a short explanation."
        .to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 4096,
            context_size: 8192,
            gpu_layers: 0,
            system_prompt: default_system_prompt(),
            models_directory: get_data_dir()
                .ok()
                .map(|dir| dir.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            last_model_path: None,
            auto_load_model: true,
        }
    }
}

impl EngineSettings {
    /// Clamp all parameters into acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = 40;
        }

        self.max_tokens = self.max_tokens.clamp(1, 65536);

        // Snap to the context sizes the runtime handles well
        let valid_context_sizes = [2048, 4096, 8192, 16384, 32768, 65536, 131072];
        if !valid_context_sizes.contains(&self.context_size) {
            self.context_size = *valid_context_sizes
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        // Can't generate more than the context allows
        if self.max_tokens > self.context_size {
            self.max_tokens = self.context_size / 2;
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk.
///
/// Returns default settings if the file doesn't exist or is corrupted.
pub fn load_settings() -> EngineSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            EngineSettings::default()
        }
    }
}

fn load_settings_internal() -> Result<EngineSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(EngineSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: EngineSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &EngineSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.top_p, 0.9);
        assert_eq!(settings.top_k, 40);
        assert_eq!(settings.context_size, 8192);
        assert!(settings.auto_load_model);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = EngineSettings::default();

        settings.temperature = 5.0;
        settings.validate();
        assert_eq!(settings.temperature, 2.0);

        settings.temperature = -1.0;
        settings.validate();
        assert_eq!(settings.temperature, 0.0);

        settings.top_p = 2.0;
        settings.validate();
        assert_eq!(settings.top_p, 1.0);

        settings.top_k = 0;
        settings.validate();
        assert_eq!(settings.top_k, 40);
    }

    #[test]
    fn test_context_size_snaps_to_valid_values() {
        let mut settings = EngineSettings::default();
        settings.context_size = 5000;
        settings.validate();
        assert_eq!(settings.context_size, 4096);

        settings.context_size = 100_000;
        settings.validate();
        assert_eq!(settings.context_size, 131072);
    }

    #[test]
    fn test_max_tokens_capped_by_context() {
        let mut settings = EngineSettings::default();
        settings.context_size = 2048;
        settings.max_tokens = 60000;
        settings.validate();
        assert_eq!(settings.max_tokens, 1024);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = EngineSettings::default();

        let json = serde_json::to_string(&settings).expect("serialize");
        let deserialized: EngineSettings = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(settings.temperature, deserialized.temperature);
        assert_eq!(settings.top_p, deserialized.top_p);
        assert_eq!(settings.context_size, deserialized.context_size);
    }
}
