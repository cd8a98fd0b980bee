//! Log line → [`DomainEvent`] parsing.
//!
//! Parsing is driven by an ordered table of [`ParseRule`]s; the first rule
//! whose pattern matches the line body wins. New event kinds are added by
//! appending rules, never by touching control flow. Most server log lines
//! match no rule at all — that is the normal case, not an error.
//!
//! The parser keeps one piece of state: a per-source timestamp watermark.
//! Server logs carry time-of-day stamps, so a backwards step smaller than
//! half a day is flagged as corruption while a larger one is treated as the
//! midnight rollover.

use std::sync::Arc;

use chrono::NaiveTime;
use regex::Regex;
use tracing::{debug, warn};

use crate::event::{DomainEvent, EventKind};
use crate::metrics::BridgeCounters;

/// Line prefix shared by every server log line:
/// `[HH:MM:SS] [thread/LEVEL]` with an optional logger-source bracket, as
/// emitted by both vanilla and modded servers.
const LINE_PREFIX: &str =
    r#"^\[(?P<time>\d{2}:\d{2}:\d{2})\] \[(?P<thread>[^\]]+)\](?: \[(?P<source>[^\]]*)\])?: (?P<body>.*)$"#;

/// One pattern rule: a line-body shape mapped to an event kind.
///
/// Field extraction is by named capture group: `player` and `message`.
#[derive(Debug, Clone)]
pub struct ParseRule {
    /// Event kind produced on match.
    pub kind: EventKind,
    /// Pattern applied to the line body (after the timestamp prefix).
    pub pattern: Regex,
}

/// An ordered collection of parse rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<ParseRule>,
}

fn rule(kind: EventKind, pattern: &str) -> ParseRule {
    #[allow(clippy::unwrap_used)] // hard-coded patterns, exercised by tests
    let pattern = Regex::new(pattern).unwrap();
    ParseRule { kind, pattern }
}

impl RuleSet {
    /// Rules for a vanilla Minecraft server log.
    ///
    /// Ordering matters: `lost connection` must precede the generic death
    /// patterns, and chat must be matched before anything that could read
    /// a chat body as a server message.
    #[must_use]
    pub fn minecraft() -> Self {
        const NAME: &str = r"[A-Za-z0-9_]{1,16}";
        Self {
            rules: vec![
                rule(
                    EventKind::ChatMessage,
                    &format!(r"^<(?P<player>{NAME})> (?P<message>.+)$"),
                ),
                rule(
                    EventKind::PlayerJoin,
                    &format!(r"^(?P<player>{NAME}) joined the game$"),
                ),
                rule(
                    EventKind::PlayerLeave,
                    &format!(r"^(?P<player>{NAME}) left the game$"),
                ),
                rule(
                    EventKind::PlayerLeave,
                    &format!(r"^(?P<player>{NAME}) lost connection: (?P<message>.+)$"),
                ),
                rule(
                    EventKind::PlayerDeath,
                    &format!(
                        r"^(?P<player>{NAME}) (?P<message>was slain by .+|was shot by .+|was blown up by .+|was killed by .+|drowned|blew up|burned to death|starved to death|suffocated in a wall|hit the ground too hard|fell from a high place|fell out of the world|tried to swim in lava.*|withered away|froze to death)$"
                    ),
                ),
                rule(
                    EventKind::Other,
                    r#"^Done \([^)]+\)! For help, type "help".*$"#,
                ),
            ],
        }
    }

    /// Build a rule set from explicit rules, in matching order.
    #[must_use]
    pub fn new(rules: Vec<ParseRule>) -> Self {
        Self { rules }
    }

    /// Number of rules in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The pattern-matching state machine turning raw lines into events.
pub struct LogParser {
    prefix: Regex,
    rules: RuleSet,
    max_line_len: usize,
    watermark: Option<NaiveTime>,
    counters: Arc<BridgeCounters>,
}

impl std::fmt::Debug for LogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogParser")
            .field("rules", &self.rules.len())
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

impl LogParser {
    /// Create a parser over the given rule table.
    #[must_use]
    pub fn new(rules: RuleSet, max_line_len: usize, counters: Arc<BridgeCounters>) -> Self {
        #[allow(clippy::unwrap_used)] // hard-coded pattern, exercised by tests
        let prefix = Regex::new(LINE_PREFIX).unwrap();
        Self {
            prefix,
            rules,
            max_line_len,
            watermark: None,
            counters,
        }
    }

    /// Clear buffered state after a stream reset (truncation/rotation).
    ///
    /// The timestamp watermark belongs to the old stream; a fresh file may
    /// legitimately start earlier in the day.
    pub fn reset(&mut self) {
        self.watermark = None;
    }

    /// Parse one complete log line.
    ///
    /// Returns `None` for irrelevant lines (the common case) and for
    /// malformed lines, which are additionally counted as anomalies.
    pub fn parse_line(&mut self, line: &str) -> Option<DomainEvent> {
        BridgeCounters::bump(&self.counters.lines_read);

        if line.len() > self.max_line_len {
            BridgeCounters::bump(&self.counters.parse_anomalies);
            warn!(len = line.len(), "Rejected overlong log line");
            return None;
        }
        if line.chars().any(|c| c.is_control() && c != '\t') {
            BridgeCounters::bump(&self.counters.parse_anomalies);
            warn!("Rejected log line containing control characters");
            return None;
        }

        let caps = self.prefix.captures(line)?;
        let timestamp = NaiveTime::parse_from_str(&caps["time"], "%H:%M:%S").ok()?;
        let body = &caps["body"];

        let matched = self
            .rules
            .rules
            .iter()
            .find_map(|r| r.pattern.captures(body).map(|c| (r.kind, c)))?;
        let (kind, caps) = matched;

        self.check_watermark(timestamp, line);
        BridgeCounters::bump(&self.counters.events_parsed);

        let event = DomainEvent {
            kind,
            player: caps.name("player").map(|m| m.as_str().to_string()),
            message: caps.name("message").map(|m| m.as_str().to_string()),
            timestamp,
            raw: line.to_string(),
        };
        debug!(kind = %event.kind, player = ?event.player, "Parsed domain event");
        Some(event)
    }

    /// Enforce the non-decreasing timestamp invariant, allowing the
    /// midnight rollover (a backwards step of more than half a day).
    fn check_watermark(&mut self, timestamp: NaiveTime, line: &str) {
        if let Some(watermark) = self.watermark {
            if timestamp < watermark {
                let gap = watermark - timestamp;
                if gap < chrono::Duration::hours(12) {
                    BridgeCounters::bump(&self.counters.parse_anomalies);
                    warn!(
                        %watermark,
                        %timestamp,
                        line,
                        "Log timestamp went backwards — possible log corruption"
                    );
                    return; // keep the higher watermark
                }
                // Midnight rollover: fall through and adopt the new time.
            }
        }
        self.watermark = Some(timestamp);
    }
}
