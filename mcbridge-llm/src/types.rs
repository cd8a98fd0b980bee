//! Types crossing the AI responder boundary.

use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The human user.
    User,
    /// The AI responder.
    Assistant,
    /// Context injected by the bridge.
    System,
}

impl TurnRole {
    /// Wire name used by OpenAI-compatible APIs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One prior turn of conversation handed to the responder as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who spoke.
    pub role: TurnRole,
    /// What was said.
    pub content: String,
}

impl ChatTurn {
    /// Convenience constructor.
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
