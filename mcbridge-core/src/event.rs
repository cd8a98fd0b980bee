//! Domain events extracted from the server log.
//!
//! One [`DomainEvent`] is created per matched log line, consumed exactly
//! once by the bridge dispatcher, and dropped unless it is surfaced into
//! the memory store.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// What kind of fact a log line described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A player joined the game.
    PlayerJoin,
    /// A player left the game (or lost connection).
    PlayerLeave,
    /// A player said something in game chat.
    ChatMessage,
    /// A player died.
    PlayerDeath,
    /// A recognised but uncategorised server line (e.g. startup complete).
    Other,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlayerJoin => write!(f, "join"),
            Self::PlayerLeave => write!(f, "leave"),
            Self::ChatMessage => write!(f, "chat"),
            Self::PlayerDeath => write!(f, "death"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A structured fact extracted from one raw log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event classification.
    pub kind: EventKind,
    /// Player the event is about, when the rule extracts one.
    pub player: Option<String>,
    /// Free-text payload (chat body, death message).
    pub message: Option<String>,
    /// Time-of-day stamp from the `[HH:MM:SS]` log prefix.
    pub timestamp: NaiveTime,
    /// The raw line the event was parsed from.
    pub raw: String,
}

impl DomainEvent {
    /// Stable key used to deduplicate repeated announcements
    /// (`join:Alice`, `leave:Alice`).
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match &self.player {
            Some(player) => format!("{}:{player}", self.kind),
            None => self.kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_includes_player() {
        let event = DomainEvent {
            kind: EventKind::PlayerJoin,
            player: Some("Alice".to_string()),
            message: None,
            timestamp: NaiveTime::from_hms_opt(12, 0, 1).expect("valid time"),
            raw: String::new(),
        };
        assert_eq!(event.dedup_key(), "join:Alice");
    }
}
