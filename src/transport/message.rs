//! JSON message schema spoken over text frames.
//!
//! Every inbound text frame is expected to be a JSON object with a `type`
//! header. A handful of types are hub control messages; everything else
//! belongs to the application and is routed through a
//! [`MessageHandler`](crate::hub::MessageHandler) untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::frame::Frame;

/// Header types reserved for hub control messages.
pub const CONTROL_TYPES: [&str; 5] = ["subscribe", "unsubscribe", "ping", "pong", "close"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "close")]
    Close,
}

/// Application messages understood by the default pub/sub handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish { topic: String, payload: Value },
}

/// Messages the hub and its default handler send to peers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        connection_id: String,
        identity: String,
        heartbeat_interval_ms: u64,
    },

    #[serde(rename = "message")]
    Message {
        topic: String,
        payload: Value,
        timestamp: i64,
    },

    #[serde(rename = "presence")]
    Presence {
        identity: String,
        status: PresenceStatus,
        timestamp: i64,
    },

    #[serde(rename = "pong")]
    Pong {},

    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl ServerMessage {
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::text)
    }
}

/// How an inbound text frame should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Control(ControlMessage),
    /// Reserved control type whose body did not parse.
    Malformed { kind: String, error: String },
    Application,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Splits control traffic from application traffic by looking at the header.
pub fn classify(text: &str) -> Inbound {
    let kind = match serde_json::from_str::<Header>(text) {
        Ok(Header { kind: Some(kind) }) => kind,
        _ => return Inbound::Application,
    };

    if !CONTROL_TYPES.contains(&kind.as_str()) {
        return Inbound::Application;
    }

    match serde_json::from_str::<ControlMessage>(text) {
        Ok(ControlMessage::Subscribe { topic }) | Ok(ControlMessage::Unsubscribe { topic })
            if topic.trim().is_empty() =>
        {
            Inbound::Malformed {
                kind,
                error: "topic must not be empty".to_string(),
            }
        }
        Ok(control) => Inbound::Control(control),
        Err(err) => Inbound::Malformed {
            kind,
            error: err.to_string(),
        },
    }
}
