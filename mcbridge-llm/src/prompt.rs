//! Prompt assembly for the completion API.
//!
//! The dispatcher hands over the system prompt, the remembered context for
//! the user, and the new message; this module turns them into the
//! `messages` array an OpenAI-compatible endpoint expects. Remembered
//! turns are replayed with their original roles so the model sees a real
//! conversation, not a summary blob.

use serde_json::{Value, json};

use crate::types::ChatTurn;

/// Build the `messages` array for a completion request.
#[must_use]
pub fn build_messages(system_prompt: &str, context: &[ChatTurn], message: &str) -> Vec<Value> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    if !system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    for turn in context {
        messages.push(json!({ "role": turn.role.as_str(), "content": turn.content }));
    }
    messages.push(json!({ "role": "user", "content": message }));
    messages
}

/// Render context as a readable transcript, for logs and debugging.
#[must_use]
pub fn render_transcript(context: &[ChatTurn]) -> String {
    context
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}
