//! The message unit exchanged with the chat gateway.

use serde::{Deserialize, Serialize};

/// Where a message is going (or came from).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A direct conversation with one user.
    Private {
        /// The peer's user id.
        user_id: String,
    },
    /// A group / channel.
    Group {
        /// The group id.
        group_id: String,
    },
}

/// What kind of message an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ordinary chat text.
    Text,
    /// A gateway notice (member join, poke, …).
    Notice,
    /// A command frame.
    Command,
}

/// One inbound or outbound message unit.
///
/// Owned by the protocol client while in flight; handed to the dispatcher
/// by value on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Message id assigned by the gateway (inbound) or locally (outbound).
    pub id: String,
    /// Sender identity. For outbound envelopes this is the bot itself and
    /// is left empty.
    pub sender: String,
    /// Conversation the envelope belongs to.
    pub target: Target,
    /// Message body.
    pub body: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Correlation id pairing a request with its response, when the
    /// envelope is part of a correlated exchange.
    pub correlation: Option<String>,
}

impl ChatEnvelope {
    /// Build an outbound text message to a group.
    #[must_use]
    pub fn group_text(group_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: String::new(),
            target: Target::Group {
                group_id: group_id.into(),
            },
            body: body.into(),
            kind: MessageKind::Text,
            correlation: None,
        }
    }

    /// Build an outbound text message to a single user.
    #[must_use]
    pub fn private_text(user_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: String::new(),
            target: Target::Private {
                user_id: user_id.into(),
            },
            body: body.into(),
            kind: MessageKind::Text,
            correlation: None,
        }
    }

    /// Build a reply into the same conversation this envelope came from.
    #[must_use]
    pub fn reply(&self, body: impl Into<String>) -> Self {
        match &self.target {
            Target::Group { group_id } => Self::group_text(group_id.clone(), body),
            Target::Private { .. } => Self::private_text(self.sender.clone(), body),
        }
    }
}
