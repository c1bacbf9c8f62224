//! Chat session
//!
//! The conversational context bound to the loaded model. Every successful
//! generation appends its user and assistant turns, so the model sees prior
//! turns on the next call. The session lives in memory only and is cleared
//! when the model unloads; there is no prune or reset short of a reload, and
//! truncation is left to the context-window cap.

use llama_cpp_2::model::{LlamaChatMessage, LlamaModel};

use crate::types::{ChatMessage, Role};

/// Accumulated turns for the loaded model
#[derive(Debug, Default)]
pub struct ChatSession {
    turns: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record a completed exchange. Only successful generations are
    /// recorded; a failed or cancelled one leaves the session untouched.
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.turns.push(ChatMessage::new(Role::User, user));
        self.turns.push(ChatMessage::new(Role::Assistant, assistant));
    }

    /// Drop all turns; called when the model unloads
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Render the full conversation into a prompt for the model.
    ///
    /// Prefers the model's own chat template and falls back to a plain
    /// role-prefixed transcript when the model ships none.
    pub fn build_prompt(
        &self,
        model: &LlamaModel,
        system_prompt: Option<&str>,
        user_prompt: &str,
    ) -> String {
        match self.templated_prompt(model, system_prompt, user_prompt) {
            Ok(prompt) => prompt,
            Err(error) => {
                tracing::debug!("chat template not applied ({error}), using plain transcript");
                self.transcript(system_prompt, user_prompt)
            }
        }
    }

    fn templated_prompt(
        &self,
        model: &LlamaModel,
        system_prompt: Option<&str>,
        user_prompt: &str,
    ) -> Result<String, String> {
        let template = model
            .chat_template(None)
            .map_err(|e| format!("failed to load chat template: {e}"))?;

        let mut messages = Vec::with_capacity(self.turns.len() + 2);
        if let Some(system) = system_prompt {
            messages.push(
                LlamaChatMessage::new("system".to_string(), system.to_string())
                    .map_err(|e| format!("failed to build system message: {e}"))?,
            );
        }
        for turn in &self.turns {
            messages.push(
                LlamaChatMessage::new(turn.role.as_str().to_string(), turn.content.clone())
                    .map_err(|e| format!("failed to build chat message: {e}"))?,
            );
        }
        messages.push(
            LlamaChatMessage::new("user".to_string(), user_prompt.to_string())
                .map_err(|e| format!("failed to build user message: {e}"))?,
        );

        model
            .apply_chat_template(&template, &messages, true)
            .map_err(|e| format!("failed to apply chat template: {e}"))
    }

    /// Plain transcript fallback for models without a chat template
    fn transcript(&self, system_prompt: Option<&str>, user_prompt: &str) -> String {
        let mut out = String::new();
        if let Some(system) = system_prompt {
            out.push_str(system);
            out.push_str("\n\n");
        }
        for turn in &self.turns {
            out.push_str(turn.role.as_str());
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
        out.push_str("user: ");
        out.push_str(user_prompt);
        out.push_str("\nassistant:");
        out
    }
}
