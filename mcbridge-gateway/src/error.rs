//! Gateway error types.

use thiserror::Error;

/// Errors surfaced by the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The WebSocket connection failed or dropped. Recovered internally by
    /// reconnect/backoff; surfaced to callers only as a state transition.
    #[error("Gateway connection error: {0}")]
    Connection(String),

    /// A correlated API call got no response within its deadline. The
    /// pending entry has been removed; the response, if it ever arrives,
    /// will be discarded.
    #[error("No response for correlation id {id} within {timeout_ms}ms")]
    CorrelationTimeout {
        /// The correlation id that timed out.
        id: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// A frame could not be decoded or encoded.
    #[error("Wire codec error: {0}")]
    Codec(String),

    /// The client is draining (or gone); no new sends are accepted.
    #[error("Gateway client is draining, send rejected")]
    Draining,
}
