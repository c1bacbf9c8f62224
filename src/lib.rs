//! Codeloom inference core
//!
//! Library backing the Codeloom desktop studio: hosts a single local GGUF
//! model behind a stateful chat session and serves one-shot and streamed
//! generations. The UI process drives it through the `codeloom` bridge
//! binary, which speaks the line-delimited JSON protocol in [`protocol`].

pub mod inference;
pub mod protocol;
pub mod storage;
pub mod types;
