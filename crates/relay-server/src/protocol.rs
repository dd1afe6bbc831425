//! Wire protocol: one JSON object per WebSocket text frame.

use serde::{Deserialize, Serialize};

/// Shape of a raw inbound frame before classification. `type` may hold any
/// JSON value; only the exact string `"ping"` is meaningful.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: serde_json::Value,
    message: Option<String>,
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Application-level keep-alive.
    Ping,
    /// A chat request. `text` is untrimmed; emptiness is checked after trim.
    Chat { text: String },
}

impl InboundFrame {
    /// Decode a raw text frame.
    ///
    /// A frame whose `type` is exactly `"ping"` is a keep-alive; anything
    /// else, including a non-string or absent `type`, is a chat request
    /// whose payload is the `message` field (absent field becomes the empty
    /// string and is rejected downstream).
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let frame: RawFrame = serde_json::from_str(raw)?;
        if frame.kind.as_str() == Some("ping") {
            return Ok(Self::Ping);
        }
        Ok(Self::Chat {
            text: frame.message.unwrap_or_default(),
        })
    }
}

/// The five event shapes the server writes to a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// Sent exactly once per connection, before any other event.
    System { message: String },
    Error { message: String },
    Typing { status: bool },
    Pong,
    Message { sender: &'static str, message: String },
}

impl OutboundEvent {
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn typing(status: bool) -> Self {
        Self::Typing { status }
    }

    /// A bot reply. The only sender this server ever emits is `"bot"`.
    pub fn bot_message(message: impl Into<String>) -> Self {
        Self::Message {
            sender: "bot",
            message: message.into(),
        }
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound event");
            String::new()
        })
    }
}
