//! # mcbridge-gateway — Chat Gateway Protocol Client
//!
//! Owns exactly one logical connection to the chat gateway and keeps it
//! alive for the life of the bridge:
//!
//! - [`client`] — the connection state machine
//!   (`Disconnected → Connecting → Connected → Disconnected`, plus
//!   `Draining` on intentional shutdown) with transparent reconnects.
//! - [`backoff`] — exponential reconnect delays with a cap and jitter.
//! - [`codec`] — the JSON wire format: inbound push events and API
//!   responses, outbound `{action, params, echo}` frames.
//! - [`correlate`] — the pending-request table pairing outbound calls
//!   with their echoed responses.
//! - [`envelope`] — the [`ChatEnvelope`] unit handed to and received from
//!   the dispatcher.
//!
//! Ordering between frames on one connection is preserved; ordering across
//! a reconnect is not — frames in flight during a drop are lost, never
//! duplicated.

pub mod backoff;
pub mod client;
pub mod codec;
pub mod correlate;
pub mod envelope;
pub mod error;

pub use client::{ConnectionState, GatewayClientConfig, GatewayHandle};
pub use envelope::{ChatEnvelope, MessageKind, Target};
pub use error::GatewayError;
