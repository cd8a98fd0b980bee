//! # mcbridge — the bridge daemon
//!
//! Wires the core pipeline, the gateway client, and the AI responder into
//! one process. The interesting logic lives in [`dispatcher`] — the only
//! component that correlates log events, chat traffic, and memory. The
//! binary entry point (`main.rs`) is plumbing: CLI, config, logging,
//! signals.

pub mod dispatcher;
pub mod server_api;

pub use dispatcher::{Dispatcher, DispatcherConfig};
