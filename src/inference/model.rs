//! GGUF model file validation
//!
//! Cheap file-level checks run before a path is handed to the llama runtime,
//! so a bad selection fails the load call instead of a later generation.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use thiserror::Error;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// GGUF versions the runtime understands
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// Errors from model file validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(String),

    #[error("Failed to read model file: {0}")]
    Unreadable(String),

    #[error("Not a GGUF file (bad magic)")]
    InvalidMagic,

    #[error("Unsupported GGUF version {0}")]
    UnsupportedVersion(u32),
}

/// Header fields sniffed from a GGUF file
#[derive(Debug, Clone, PartialEq)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub size_bytes: u64,
}

/// Validate that `path` points at a readable GGUF file.
///
/// Reads only the fixed 16-byte header: magic, version, tensor count.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }

    let mut file = File::open(path).map_err(|e| ModelError::Unreadable(e.to_string()))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| ModelError::Unreadable(e.to_string()))?
        .len();

    let mut header = [0u8; 16];
    file.read_exact(&mut header).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ModelError::InvalidMagic
        } else {
            ModelError::Unreadable(e.to_string())
        }
    })?;

    if header[0..4] != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic);
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut tensor_count_bytes = [0u8; 8];
    tensor_count_bytes.copy_from_slice(&header[8..16]);
    let tensor_count = u64::from_le_bytes(tensor_count_bytes);

    Ok(GgufMetadata {
        version,
        tensor_count,
        size_bytes,
    })
}
