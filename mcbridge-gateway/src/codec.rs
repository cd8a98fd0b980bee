//! JSON wire codec for the gateway protocol.
//!
//! Inbound frames are either push events (`post_type` present) or API
//! responses (`echo`/`retcode` present). Outbound frames are
//! `{ "action": ..., "params": ..., "echo": ... }`, with `echo` carrying
//! the correlation id the gateway reflects back on the response.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::envelope::{ChatEnvelope, MessageKind, Target};
use crate::error::GatewayError;

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A chat message pushed by the gateway.
    Event(ChatEnvelope),
    /// A response to a correlated API call.
    ApiResponse(ApiResponse),
    /// Notices, requests, heartbeats — decoded but not bridged.
    Meta {
        /// The frame's `post_type`.
        kind: String,
    },
    /// A frame this bridge does not understand. Logged and dropped.
    Unknown(Value),
}

/// Response to an outbound API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Gateway status string ("ok" / "failed").
    #[serde(default)]
    pub status: String,
    /// Numeric return code, 0 on success.
    #[serde(default)]
    pub retcode: i64,
    /// The correlation id this response answers.
    #[serde(default)]
    pub echo: Option<String>,
    /// Action-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    /// Whether the gateway reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.retcode == 0
    }
}

/// An outbound API call frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundAction {
    /// Gateway action name (e.g. `send_msg`).
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// Correlation id, echoed back on the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl OutboundAction {
    /// Build a `send_msg` action from an outbound envelope.
    #[must_use]
    pub fn from_envelope(envelope: &ChatEnvelope) -> Self {
        let params = match &envelope.target {
            Target::Private { user_id } => json!({
                "message_type": "private",
                "user_id": user_id,
                "message": envelope.body,
            }),
            Target::Group { group_id } => json!({
                "message_type": "group",
                "group_id": group_id,
                "message": envelope.body,
            }),
        };
        Self {
            action: "send_msg".to_string(),
            params,
            echo: envelope.correlation.clone(),
        }
    }

    /// Serialize to the wire string.
    ///
    /// # Errors
    /// Returns [`GatewayError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(|e| GatewayError::Codec(e.to_string()))
    }
}

/// Decode one inbound wire frame.
///
/// # Errors
/// Returns [`GatewayError::Codec`] if the frame is not valid JSON. A frame
/// that is valid JSON but has an unrecognised shape decodes to
/// [`Inbound::Unknown`] rather than erroring.
pub fn decode(text: &str) -> Result<Inbound, GatewayError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| GatewayError::Codec(e.to_string()))?;

    if let Some(post_type) = value.get("post_type").and_then(Value::as_str) {
        if post_type == "message" {
            return Ok(decode_message_event(&value));
        }
        return Ok(Inbound::Meta {
            kind: post_type.to_string(),
        });
    }

    if value.get("echo").is_some() || value.get("retcode").is_some() {
        let response: ApiResponse = serde_json::from_value(value.clone())
            .map_err(|e| GatewayError::Codec(e.to_string()))?;
        return Ok(Inbound::ApiResponse(response));
    }

    Ok(Inbound::Unknown(value))
}

/// The gateway sends numeric ids as numbers; normalize to strings.
fn id_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn decode_message_event(value: &Value) -> Inbound {
    let message_type = value
        .get("message_type")
        .and_then(Value::as_str)
        .unwrap_or("private");
    let sender = id_string(value.get("user_id"));
    let target = if message_type == "group" {
        Target::Group {
            group_id: id_string(value.get("group_id")),
        }
    } else {
        Target::Private {
            user_id: sender.clone(),
        }
    };

    Inbound::Event(ChatEnvelope {
        id: id_string(value.get("message_id")),
        sender,
        target,
        body: value
            .get("raw_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        kind: MessageKind::Text,
        correlation: None,
    })
}
