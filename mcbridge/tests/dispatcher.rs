//! End-to-end dispatcher tests with a scripted AI responder.
//!
//! These drive the dispatcher exactly the way the daemon does — over its
//! two inbound channels — and observe the outbound envelope stream and the
//! memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use mcbridge::dispatcher::{Dispatcher, DispatcherConfig};
use mcbridge_core::event::{DomainEvent, EventKind};
use mcbridge_core::memory::{MemoryStore, Role};
use mcbridge_core::metrics::BridgeCounters;
use mcbridge_core::store::LongTermStore;
use mcbridge_gateway::envelope::{ChatEnvelope, MessageKind, Target};
use mcbridge_llm::client::Responder;
use mcbridge_llm::error::LlmError;
use mcbridge_llm::types::ChatTurn;

/// Records every call and answers from a script.
struct ScriptedResponder {
    calls: Mutex<Vec<(Vec<ChatTurn>, String)>>,
    reply: Result<String, ()>,
}

impl ScriptedResponder {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reply: Ok(reply.to_string()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reply: Err(()),
        })
    }

    fn calls(&self) -> Vec<(Vec<ChatTurn>, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn complete(
        &self,
        context: &[ChatTurn],
        message: &str,
        _system_prompt: &str,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .push((context.to_vec(), message.to_string()));
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(()) => Err(LlmError::RequestFailed("scripted failure".into())),
        }
    }
}

struct Harness {
    events_tx: mpsc::Sender<DomainEvent>,
    inbound_tx: mpsc::Sender<ChatEnvelope>,
    outbound_rx: mpsc::Receiver<ChatEnvelope>,
    memory: Arc<MemoryStore>,
    counters: Arc<BridgeCounters>,
    join: tokio::task::JoinHandle<()>,
    _shutdown_tx: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

fn harness(responder: Arc<dyn Responder>, config: DispatcherConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let counters = Arc::new(BridgeCounters::new());
    let memory = Arc::new(MemoryStore::new(
        LongTermStore::open(dir.path()).expect("open store"),
        16,
        Arc::clone(&counters),
    ));

    let (events_tx, events_rx) = mpsc::channel(16);
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let (outbound_tx, outbound_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher::new(
        config,
        Arc::clone(&memory),
        responder,
        None,
        outbound_tx,
        Arc::clone(&counters),
    ));
    let join = tokio::spawn(dispatcher.run(events_rx, inbound_rx, shutdown_rx));

    Harness {
        events_tx,
        inbound_tx,
        outbound_rx,
        memory,
        counters,
        join,
        _shutdown_tx: shutdown_tx,
        _dir: dir,
    }
}

fn announcing_config() -> DispatcherConfig {
    DispatcherConfig {
        announce_group: "2002".to_string(),
        self_id: "9999".to_string(),
        ..DispatcherConfig::default()
    }
}

fn join_event(player: &str) -> DomainEvent {
    DomainEvent {
        kind: EventKind::PlayerJoin,
        player: Some(player.to_string()),
        message: None,
        timestamp: NaiveTime::from_hms_opt(12, 0, 1).expect("valid time"),
        raw: format!("[12:00:01] [Server thread/INFO]: {player} joined the game"),
    }
}

fn private_message(sender: &str, body: &str) -> ChatEnvelope {
    ChatEnvelope {
        id: "1".into(),
        sender: sender.to_string(),
        target: Target::Private {
            user_id: sender.to_string(),
        },
        body: body.to_string(),
        kind: MessageKind::Text,
        correlation: None,
    }
}

fn group_message(sender: &str, body: &str) -> ChatEnvelope {
    ChatEnvelope {
        id: "2".into(),
        sender: sender.to_string(),
        target: Target::Group {
            group_id: "2002".into(),
        },
        body: body.to_string(),
        kind: MessageKind::Text,
        correlation: None,
    }
}

async fn recv_outbound(h: &mut Harness) -> ChatEnvelope {
    tokio::time::timeout(Duration::from_secs(5), h.outbound_rx.recv())
        .await
        .expect("outbound envelope in time")
        .expect("outbound channel open")
}

#[tokio::test]
async fn join_event_becomes_a_group_announcement() {
    let responder = ScriptedResponder::replying("unused");
    let mut h = harness(responder, announcing_config());

    h.events_tx
        .send(join_event("Alice"))
        .await
        .expect("send event");

    let out = recv_outbound(&mut h).await;
    assert_eq!(
        out.target,
        Target::Group {
            group_id: "2002".into()
        }
    );
    assert!(out.body.contains("Alice"));
    assert!(out.body.contains("joined"));
}

#[tokio::test]
async fn repeated_join_within_window_is_announced_once() {
    let responder = ScriptedResponder::replying("unused");
    let mut h = harness(responder, announcing_config());

    h.events_tx.send(join_event("Alice")).await.expect("send");
    h.events_tx.send(join_event("Alice")).await.expect("send");
    h.events_tx.send(join_event("Bob")).await.expect("send");

    let first = recv_outbound(&mut h).await;
    assert!(first.body.contains("Alice"));
    // The duplicate is suppressed, so the next envelope is Bob's.
    let second = recv_outbound(&mut h).await;
    assert!(second.body.contains("Bob"));
}

#[tokio::test]
async fn bot_directed_message_with_empty_memory_calls_ai_once() {
    let responder = ScriptedResponder::replying("hello Bob!");
    let mut h = harness(Arc::clone(&responder) as Arc<dyn Responder>, announcing_config());

    h.inbound_tx
        .send(private_message("Bob", "hello"))
        .await
        .expect("send envelope");

    let out = recv_outbound(&mut h).await;
    assert_eq!(out.body, "hello Bob!");
    assert_eq!(
        out.target,
        Target::Private {
            user_id: "Bob".into()
        }
    );

    // Exactly one AI call, with empty context and the message "hello".
    let calls = responder.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.is_empty());
    assert_eq!(calls[0].1, "hello");

    // Two memory records, user then assistant, in that order.
    let records = h.memory.context("Bob", 10).expect("context");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].role, Role::User);
    assert_eq!(records[0].content, "hello");
    assert_eq!(records[1].role, Role::Assistant);
    assert_eq!(records[1].content, "hello Bob!");
}

#[tokio::test]
async fn second_exchange_sees_the_first_as_context() {
    let responder = ScriptedResponder::replying("reply");
    let mut h = harness(Arc::clone(&responder) as Arc<dyn Responder>, announcing_config());

    h.inbound_tx
        .send(private_message("Bob", "first"))
        .await
        .expect("send");
    recv_outbound(&mut h).await;

    h.inbound_tx
        .send(private_message("Bob", "second"))
        .await
        .expect("send");
    recv_outbound(&mut h).await;

    let calls = responder.calls();
    assert_eq!(calls.len(), 2);
    let second_context = &calls[1].0;
    assert_eq!(second_context.len(), 2);
    assert_eq!(second_context[0].content, "first");
    assert_eq!(second_context[1].content, "reply");
}

#[tokio::test]
async fn ai_failure_sends_fallback_and_records_nothing() {
    let responder = ScriptedResponder::failing();
    let config = announcing_config();
    let fallback = config.fallback_reply.clone();
    let mut h = harness(Arc::clone(&responder) as Arc<dyn Responder>, config);

    h.inbound_tx
        .send(private_message("Bob", "hello"))
        .await
        .expect("send");

    let out = recv_outbound(&mut h).await;
    assert_eq!(out.body, fallback);

    // The failure was counted, not retried.
    assert_eq!(responder.calls().len(), 1);
    assert_eq!(h.counters.snapshot().ai_failures, 1);
    assert!(h.memory.context("Bob", 10).expect("context").is_empty());
}

#[tokio::test]
async fn group_chatter_is_ignored_but_mention_and_prefix_get_replies() {
    let responder = ScriptedResponder::replying("yes?");
    let mut h = harness(Arc::clone(&responder) as Arc<dyn Responder>, announcing_config());

    // Plain group chatter: not directed at the bot.
    h.inbound_tx
        .send(group_message("1001", "just chatting"))
        .await
        .expect("send");

    // A mention and a prefixed command are both directed.
    h.inbound_tx
        .send(group_message("1001", "[CQ:at,qq=9999] are you there"))
        .await
        .expect("send");
    h.inbound_tx
        .send(group_message("1001", "!ping"))
        .await
        .expect("send");

    let first = recv_outbound(&mut h).await;
    assert_eq!(first.body, "yes?");
    let second = recv_outbound(&mut h).await;
    assert_eq!(second.body, "yes?");

    // Both exchanges run as detached tasks, so their relative order is
    // unspecified — assert the set of messages, not the order.
    let mut messages: Vec<String> = responder.calls().into_iter().map(|(_, m)| m).collect();
    messages.sort();
    assert_eq!(messages, ["are you there", "ping"]);
}

#[tokio::test]
async fn game_chat_is_surfaced_into_player_memory() {
    let responder = ScriptedResponder::replying("unused");
    let h = harness(responder, announcing_config());

    let event = DomainEvent {
        kind: EventKind::ChatMessage,
        player: Some("Alice".to_string()),
        message: Some("anyone seen my dog?".to_string()),
        timestamp: NaiveTime::from_hms_opt(12, 30, 0).expect("valid time"),
        raw: String::new(),
    };
    h.events_tx.send(event).await.expect("send");

    // Close both streams so the dispatcher finishes processing and exits.
    drop(h.events_tx);
    drop(h.inbound_tx);
    tokio::time::timeout(Duration::from_secs(5), h.join)
        .await
        .expect("dispatcher exits")
        .expect("no panic");

    let records = h.memory.context("mc:Alice", 10).expect("context");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "anyone seen my dog?");
    assert_eq!(records[0].role, Role::User);
}

#[tokio::test]
async fn dispatcher_exits_when_both_streams_close() {
    let responder = ScriptedResponder::replying("unused");
    let h = harness(responder, announcing_config());

    drop(h.events_tx);
    drop(h.inbound_tx);

    tokio::time::timeout(Duration::from_secs(5), h.join)
        .await
        .expect("dispatcher exits")
        .expect("no panic");
}
