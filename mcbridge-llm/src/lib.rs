//! # mcbridge-llm — AI Responder Boundary
//!
//! The bridge treats the AI model as a single request/response
//! collaborator: given prior conversation context, a new message, and a
//! system prompt, produce one reply. This crate owns that boundary:
//!
//! - [`Responder`] — the trait the dispatcher programs against (and tests
//!   script against).
//! - [`AiClient`] — the real implementation over an OpenAI-compatible
//!   `/v1/chat/completions` endpoint.
//! - [`prompt`] — assembly of the outgoing message array from memory
//!   context.
//!
//! Failures are surfaced, never retried here: the dispatcher's contract is
//! to answer the user with a fallback and treat the next request
//! independently.

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{AiClient, AiProvider, Responder};
pub use error::LlmError;
pub use types::{ChatTurn, TurnRole};
