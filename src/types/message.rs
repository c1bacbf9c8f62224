//! Message types
//!
//! Defines chat turn structures and roles.

use serde::{Deserialize, Serialize};

/// Role of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// System instruction
    System,
    /// Turn written by the user
    User,
    /// Turn produced by the model
    Assistant,
}

impl Role {
    /// Role name as chat templates expect it
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the turn's author
    pub role: Role,
    /// The content of the turn
    pub content: String,
    /// Timestamp when the turn was recorded (seconds since the epoch)
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a new chat turn stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}
