//! Shared value types
//!
//! Plain data structures used across the engine and the bridge.

pub mod message;

pub use message::{ChatMessage, Role};
