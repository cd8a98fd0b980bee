//! The bridge dispatcher — the only component that correlates log events,
//! chat traffic, and memory.
//!
//! The dispatcher consumes two ordered streams (domain events from the log
//! pipeline, chat envelopes from the gateway) one item at a time per
//! stream. Anything slow — AI completions, management API calls — is
//! spawned as a detached task so neither stream ever stalls the other.
//!
//! Announcement policy: join/leave events for the same player within the
//! configured window are announced once (servers flap). AI policy: one
//! call per bot-directed message, no automatic retry; failures get the
//! configured fallback reply and the next request starts fresh.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use mcbridge_core::config::BridgeConfig;
use mcbridge_core::event::{DomainEvent, EventKind};
use mcbridge_core::memory::{MemoryRecord, MemoryStore, Role};
use mcbridge_core::metrics::BridgeCounters;
use mcbridge_gateway::envelope::{ChatEnvelope, Target};
use mcbridge_llm::client::Responder;
use mcbridge_llm::types::{ChatTurn, TurnRole};

use crate::server_api::ServerApiClient;

/// Identity namespace for in-game players, kept apart from gateway user
/// ids so "Bob" in game chat and gateway user "Bob" never share memory.
const GAME_USER_PREFIX: &str = "mc:";

/// Dedup window entries kept at most; old players simply age out.
const DEDUP_CAPACITY: usize = 256;

/// Dispatcher tuning, extracted from the bridge configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// The bot's own gateway id, for mention matching.
    pub self_id: String,
    /// Prefix that directs a group message at the bot.
    pub command_prefix: String,
    /// Group that receives join/leave/death announcements; empty disables
    /// announcements.
    pub announce_group: String,
    /// Most-recent turns handed to the AI as context.
    pub context_turns: usize,
    /// System prompt for AI completions.
    pub system_prompt: String,
    /// Deadline for one AI completion.
    pub ai_timeout: Duration,
    /// Reply sent when the AI call fails or times out.
    pub fallback_reply: String,
    /// Window within which a repeated join/leave is not re-announced.
    pub dedup_window: Duration,
    /// Bot-directed message that triggers a server status report.
    pub status_keyword: String,
    /// How long in-flight AI calls may finish during shutdown.
    pub shutdown_grace: Duration,
}

impl DispatcherConfig {
    /// Derive dispatcher settings from the loaded bridge configuration.
    #[must_use]
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            self_id: config.gateway.self_id.clone(),
            command_prefix: config.gateway.command_prefix.clone(),
            announce_group: config.gateway.announce_group.clone(),
            context_turns: config.memory.context_turns,
            system_prompt: config.ai.system_prompt.clone(),
            ai_timeout: Duration::from_millis(config.ai.timeout_ms),
            fallback_reply: config.ai.fallback_reply.clone(),
            dedup_window: Duration::from_secs(config.log.dedup_window_secs),
            status_keyword: "status".to_string(),
            shutdown_grace: Duration::from_millis(config.gateway.drain_grace_ms),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_bridge(&BridgeConfig::default())
    }
}

/// The orchestrator. Cheap to share via [`Arc`]; all mutable state is
/// internal.
pub struct Dispatcher {
    config: DispatcherConfig,
    memory: Arc<MemoryStore>,
    responder: Arc<dyn Responder>,
    server_api: Option<Arc<ServerApiClient>>,
    outbound: mpsc::Sender<ChatEnvelope>,
    dedup: Mutex<LruCache<String, Instant>>,
    counters: Arc<BridgeCounters>,
}

impl Dispatcher {
    /// Build a dispatcher.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        memory: Arc<MemoryStore>,
        responder: Arc<dyn Responder>,
        server_api: Option<Arc<ServerApiClient>>,
        outbound: mpsc::Sender<ChatEnvelope>,
        counters: Arc<BridgeCounters>,
    ) -> Self {
        let capacity = NonZeroUsize::new(DEDUP_CAPACITY).expect("nonzero constant");
        Self {
            config,
            memory,
            responder,
            server_api,
            outbound,
            dedup: Mutex::new(LruCache::new(capacity)),
            counters,
        }
    }

    /// Process both streams until shutdown (or until both streams end),
    /// then let in-flight AI work finish up to the grace deadline.
    pub async fn run(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<DomainEvent>,
        mut inbound_rx: mpsc::Receiver<ChatEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut events_open = true;
        let mut inbound_open = true;

        loop {
            if !events_open && !inbound_open {
                break;
            }
            tokio::select! {
                event = events_rx.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        events_open = false;
                        warn!("Log event stream ended; continuing in chat-only mode");
                    }
                },
                envelope = inbound_rx.recv(), if inbound_open => match envelope {
                    Some(envelope) => Self::handle_envelope(&self, envelope, &mut tasks),
                    None => {
                        inbound_open = false;
                        warn!("Gateway inbound stream ended");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {},
            }
        }

        // Grace period for detached work.
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        abandoned = tasks.len(),
                        "Shutdown grace elapsed with AI calls in flight"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Log events
    // ------------------------------------------------------------------

    async fn handle_event(&self, event: DomainEvent) {
        match event.kind {
            EventKind::PlayerJoin | EventKind::PlayerLeave | EventKind::PlayerDeath => {
                self.announce(&event).await;
            }
            EventKind::ChatMessage => self.record_game_chat(&event),
            EventKind::Other => debug!(raw = %event.raw, "Unbridged server event"),
        }
    }

    async fn announce(&self, event: &DomainEvent) {
        if self.config.announce_group.is_empty() {
            return;
        }
        let Some(player) = event.player.as_deref() else {
            return;
        };

        // Joins and leaves flap when a connection is unstable; deaths are
        // always distinct occurrences.
        if matches!(event.kind, EventKind::PlayerJoin | EventKind::PlayerLeave)
            && self.recently_announced(event.dedup_key())
        {
            debug!(player, kind = %event.kind, "Suppressing repeated announcement");
            return;
        }

        let body = match event.kind {
            EventKind::PlayerJoin => format!("{player} joined the game — welcome!"),
            EventKind::PlayerLeave => format!("{player} left the game. See you next time!"),
            EventKind::PlayerDeath => match event.message.as_deref() {
                Some(message) => format!("{player} {message}"),
                None => format!("{player} died"),
            },
            _ => return,
        };

        info!(player, kind = %event.kind, "Announcing server event");
        self.send_out(ChatEnvelope::group_text(
            self.config.announce_group.clone(),
            body,
        ))
        .await;
    }

    fn recently_announced(&self, key: String) -> bool {
        let mut dedup = self.dedup.lock();
        if let Some(last) = dedup.get(&key) {
            if last.elapsed() < self.config.dedup_window {
                return true;
            }
        }
        dedup.put(key, Instant::now());
        false
    }

    /// Surface in-game chat into that player's memory so the AI can refer
    /// to it later.
    fn record_game_chat(&self, event: &DomainEvent) {
        let (Some(player), Some(message)) = (event.player.as_deref(), event.message.as_deref())
        else {
            return;
        };
        let user = format!("{GAME_USER_PREFIX}{player}");
        if let Err(e) = self
            .memory
            .append(MemoryRecord::now(user, Role::User, message))
        {
            error!(player, error = %e, "Failed to record game chat");
        }
    }

    // ------------------------------------------------------------------
    // Chat envelopes
    // ------------------------------------------------------------------

    fn handle_envelope(this: &Arc<Self>, envelope: ChatEnvelope, tasks: &mut JoinSet<()>) {
        BridgeCounters::bump(&this.counters.envelopes_in);

        let Some(message) = this.directed_message(&envelope) else {
            debug!(sender = %envelope.sender, "Envelope not directed at the bot");
            return;
        };
        if message.is_empty() {
            return;
        }

        let this = Arc::clone(this);
        if message.eq_ignore_ascii_case(&this.config.status_keyword) && this.server_api.is_some() {
            tasks.spawn(async move { this.report_status(envelope).await });
        } else {
            // Detached: a slow completion must not stall either stream.
            tasks.spawn(async move { this.respond(envelope, message).await });
        }
    }

    /// Extract the message text if the envelope is directed at the bot:
    /// private messages always are; group messages only via mention or the
    /// command prefix.
    fn directed_message(&self, envelope: &ChatEnvelope) -> Option<String> {
        let body = envelope.body.trim();
        match &envelope.target {
            Target::Private { .. } => Some(body.to_string()),
            Target::Group { .. } => {
                if !self.config.self_id.is_empty() {
                    let mention = format!("[CQ:at,qq={}]", self.config.self_id);
                    if body.contains(&mention) {
                        return Some(body.replace(&mention, " ").trim().to_string());
                    }
                }
                if !self.config.command_prefix.is_empty() {
                    if let Some(rest) = body.strip_prefix(&self.config.command_prefix) {
                        return Some(rest.trim().to_string());
                    }
                }
                None
            }
        }
    }

    /// One AI exchange: context → completion → memory → reply.
    async fn respond(&self, envelope: ChatEnvelope, message: String) {
        let user = envelope.sender.clone();
        BridgeCounters::bump(&self.counters.ai_calls);

        // A context read failure degrades to an empty context rather than
        // dropping the user's message.
        let context: Vec<ChatTurn> = match self.memory.context(&user, self.config.context_turns) {
            Ok(records) => records.into_iter().map(to_turn).collect(),
            Err(e) => {
                error!(user, error = %e, "Context read failed; answering without memory");
                Vec::new()
            }
        };

        let completion = tokio::time::timeout(
            self.config.ai_timeout,
            self.responder
                .complete(&context, &message, &self.config.system_prompt),
        )
        .await;

        match completion {
            Ok(Ok(reply)) => {
                // The user turn is recorded first so the stored order
                // matches the conversation.
                if let Err(e) = self
                    .memory
                    .append(MemoryRecord::now(user.clone(), Role::User, message))
                {
                    error!(user, error = %e, "Failed to record user turn");
                }
                if let Err(e) =
                    self.memory
                        .append(MemoryRecord::now(user.clone(), Role::Assistant, &reply))
                {
                    error!(user, error = %e, "Failed to record assistant turn");
                }
                self.send_out(envelope.reply(reply)).await;
            }
            Ok(Err(e)) => {
                warn!(user, error = %e, "AI completion failed; sending fallback");
                BridgeCounters::bump(&self.counters.ai_failures);
                self.send_out(envelope.reply(self.config.fallback_reply.clone()))
                    .await;
            }
            Err(_) => {
                warn!(
                    user,
                    timeout_ms = self.config.ai_timeout.as_millis() as u64,
                    "AI completion timed out; sending fallback"
                );
                BridgeCounters::bump(&self.counters.ai_failures);
                self.send_out(envelope.reply(self.config.fallback_reply.clone()))
                    .await;
            }
        }
    }

    async fn report_status(&self, envelope: ChatEnvelope) {
        let Some(api) = self.server_api.as_ref() else {
            return;
        };
        let reply = match api.instance_status().await {
            Ok(state) => format!("Server instance is {state}."),
            Err(e) => {
                warn!(error = %e, "Status query failed");
                "Could not reach the server management API.".to_string()
            }
        };
        self.send_out(envelope.reply(reply)).await;
    }

    async fn send_out(&self, envelope: ChatEnvelope) {
        BridgeCounters::bump(&self.counters.envelopes_out);
        if self.outbound.send(envelope).await.is_err() {
            warn!("Outbound channel closed, dropping envelope");
        }
    }
}

fn to_turn(record: MemoryRecord) -> ChatTurn {
    let role = match record.role {
        Role::User => TurnRole::User,
        Role::Assistant => TurnRole::Assistant,
        Role::System => TurnRole::System,
    };
    ChatTurn::new(role, record.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_one_to_one() {
        let record = MemoryRecord::now("u", Role::Assistant, "x");
        assert_eq!(to_turn(record).role, TurnRole::Assistant);
    }

    #[test]
    fn default_config_has_a_status_keyword() {
        let config = DispatcherConfig::default();
        assert_eq!(config.status_keyword, "status");
        assert!(!config.fallback_reply.is_empty());
    }
}
