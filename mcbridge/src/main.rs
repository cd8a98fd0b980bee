//! Process entry point: CLI, configuration, logging, task wiring, and
//! cooperative shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mcbridge::dispatcher::{Dispatcher, DispatcherConfig};
use mcbridge::server_api::ServerApiClient;
use mcbridge_core::config::BridgeConfig;
use mcbridge_core::memory::MemoryStore;
use mcbridge_core::metrics::BridgeCounters;
use mcbridge_core::parser::{LogParser, RuleSet};
use mcbridge_core::store::LongTermStore;
use mcbridge_core::tail::{LogTailer, TailConfig, TailEvent};
use mcbridge_gateway::client::{self, GatewayClientConfig};
use mcbridge_llm::client::{AiClient, AiProvider};

/// Bridge a Minecraft server log to a chat gateway, with conversational
/// memory for the AI responder.
#[derive(Debug, Parser)]
#[command(name = "mcbridge", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "MCBRIDGE_CONFIG", default_value = "config/mcbridge.toml")]
    config: PathBuf,

    /// Log filter (overrides RUST_LOG), e.g. "info" or "mcbridge=debug".
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.config.exists() {
        write_sample_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote a sample configuration file");
        info!("Edit it (gateway address/token, log path, AI credentials) and start again");
        return Ok(());
    }

    let config = BridgeConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    run_bridge(config).await
}

fn write_sample_config(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let sample = toml::to_string_pretty(&BridgeConfig::default())?;
    std::fs::write(path, sample)?;
    Ok(())
}

async fn run_bridge(config: BridgeConfig) -> anyhow::Result<()> {
    let counters = Arc::new(BridgeCounters::new());

    // Memory: bounded sessions over durable per-user streams.
    let long_term = LongTermStore::open(&config.memory.dir)
        .with_context(|| format!("opening memory directory {}", config.memory.dir))?;
    let memory = Arc::new(MemoryStore::new(
        long_term,
        config.memory.short_term_capacity,
        Arc::clone(&counters),
    ));

    // Gateway connection.
    let (gateway, inbound_rx, gateway_join) = client::spawn(GatewayClientConfig {
        ws_url: config.gateway.ws_url.clone(),
        token: config.gateway.token.clone(),
        backoff_min: Duration::from_millis(config.gateway.backoff_min_ms),
        backoff_max: Duration::from_millis(config.gateway.backoff_max_ms),
        call_timeout: Duration::from_millis(config.gateway.call_timeout_ms),
        drain_grace: Duration::from_millis(config.gateway.drain_grace_ms),
        inbound_buffer: 256,
    });

    // AI responder.
    let responder: Arc<AiClient> = Arc::new(
        if config.ai.base_url.is_empty() || config.ai.api_key.is_empty() {
            warn!("AI responder disabled (no base_url/api_key configured)");
            AiClient::disabled()
        } else {
            AiClient::new(
                AiProvider::OpenAiCompatible {
                    base_url: config.ai.base_url.clone(),
                    api_key: config.ai.api_key.clone(),
                },
                config.ai.model.clone(),
                Duration::from_millis(config.ai.timeout_ms),
                config.ai.max_tokens,
                config.ai.temperature,
            )
        },
    );

    let server_api = ServerApiClient::from_config(&config.server_api).map(Arc::new);
    if server_api.is_none() {
        info!("Server management API disabled (no base_url configured)");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(256);

    // Log pipeline: tailer + parser feeding the dispatcher.
    let tail_join = tokio::spawn(tail_log(
        config.log.path.clone(),
        TailConfig {
            poll_interval: Duration::from_millis(config.log.poll_interval_ms),
            reopen_timeout: Duration::from_millis(config.log.reopen_timeout_ms),
            max_buffer: config.log.max_line_len.saturating_mul(8).max(64 * 1024),
        },
        config.log.max_line_len,
        events_tx,
        Arc::clone(&counters),
        shutdown_rx.clone(),
    ));

    // Outbound envelopes flow through one forwarder so the dispatcher
    // never blocks on gateway I/O.
    let (outbound_tx, mut outbound_rx) = mpsc::channel(256);
    let gateway_out = gateway.clone();
    let forward_join = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            match gateway_out.send_acked(&envelope).await {
                Ok(response) if !response.is_ok() => {
                    warn!(retcode = response.retcode, "Gateway rejected outbound message");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Outbound send failed"),
            }
        }
    });

    // Periodic memory checkpoint.
    let checkpoint_memory = Arc::clone(&memory);
    let mut checkpoint_shutdown = shutdown_rx.clone();
    let checkpoint_interval = Duration::from_secs(config.memory.checkpoint_interval_secs.max(1));
    let checkpoint_join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(checkpoint_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => match checkpoint_memory.flush_all() {
                    Ok(count) if count > 0 => info!(records = count, "Memory checkpoint"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Memory checkpoint failed"),
                },
                changed = checkpoint_shutdown.changed() => {
                    if changed.is_err() || *checkpoint_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // The dispatcher.
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::from_bridge(&config),
        Arc::clone(&memory),
        responder,
        server_api,
        outbound_tx,
        Arc::clone(&counters),
    ));
    let dispatcher_join = tokio::spawn(dispatcher.run(events_rx, inbound_rx, shutdown_rx));

    info!("Bridge up");
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("Shutdown signal received");

    // Cooperative shutdown: stop the tailer, drain the gateway, let the
    // dispatcher finish in-flight AI work, then flush memory.
    let _ = shutdown_tx.send(true);
    gateway.drain().await;

    let grace = Duration::from_millis(config.gateway.drain_grace_ms) + Duration::from_secs(5);
    for (name, join) in [
        ("dispatcher", dispatcher_join),
        ("tailer", tail_join),
        ("checkpoint", checkpoint_join),
        ("gateway", gateway_join),
        ("forwarder", forward_join),
    ] {
        if tokio::time::timeout(grace, join).await.is_err() {
            warn!(task = name, "Task did not stop within the grace period");
        }
    }

    match memory.flush_all() {
        Ok(count) => info!(records = count, "Final memory flush"),
        Err(e) => error!(error = %e, "Final memory flush failed"),
    }

    let snapshot = counters.snapshot();
    info!(
        lines = snapshot.lines_read,
        events = snapshot.events_parsed,
        anomalies = snapshot.parse_anomalies,
        ai_calls = snapshot.ai_calls,
        ai_failures = snapshot.ai_failures,
        evicted = snapshot.records_evicted,
        "Bridge stopped"
    );
    Ok(())
}

/// Tail the server log and feed parsed events to the dispatcher. A fatal
/// stream error ends this task; the dispatcher then runs chat-only.
async fn tail_log(
    path: String,
    tail_config: TailConfig,
    max_line_len: usize,
    events_tx: mpsc::Sender<mcbridge_core::event::DomainEvent>,
    counters: Arc<BridgeCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tailer =
        match LogTailer::open(&path, tail_config, true, Arc::clone(&counters)).await {
            Ok(tailer) => tailer,
            Err(e) => {
                error!(path, error = %e, "Could not open server log; running chat-only");
                return;
            }
        };
    let mut parser = LogParser::new(RuleSet::minecraft(), max_line_len, counters);

    loop {
        tokio::select! {
            event = tailer.next_event() => match event {
                Ok(TailEvent::Line(line)) => {
                    if let Some(event) = parser.parse_line(&line) {
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(TailEvent::Reset) => {
                    info!("Log stream reset");
                    parser.reset();
                }
                Err(e) => {
                    error!(path, error = %e, "Log stream failed; running chat-only");
                    return;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
