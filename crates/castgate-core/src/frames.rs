//! Client wire frames.
//!
//! Inbound frames are `{command, identifier, data}`. Outbound broadcast
//! frames are `{identifier, message}`; control frames carry a `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound client command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientCommand {
    /// Subscribe to a channel.
    Subscribe,
    /// Unsubscribe from a channel.
    Unsubscribe,
    /// Perform a channel action.
    Message,
}

impl ClientCommand {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Message => "message",
        }
    }
}

/// Frame received from a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// What the client wants.
    pub command: ClientCommand,
    /// Opaque channel identifier chosen by the client.
    pub identifier: String,
    /// Action payload (usually a JSON-encoded string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Control frame kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Keepalive carrying a unix timestamp.
    Ping,
    /// Server is closing the connection.
    Disconnect,
    /// Subscription accepted.
    ConfirmSubscription,
    /// Subscription denied by the backend.
    RejectSubscription,
}

/// Frame written to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Control frame kind; absent on broadcast frames.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub frame_type: Option<FrameType>,
    /// Channel the frame belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Broadcast payload or ping timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Disconnect reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the client should reconnect after a disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,
}

impl ServerFrame {
    fn control(frame_type: FrameType) -> Self {
        Self {
            frame_type: Some(frame_type),
            identifier: None,
            message: None,
            reason: None,
            reconnect: None,
        }
    }

    /// Broadcast payload delivered on a stream.
    pub fn message(identifier: Option<String>, message: Value) -> Self {
        Self {
            frame_type: None,
            identifier,
            message: Some(message),
            reason: None,
            reconnect: None,
        }
    }

    /// Keepalive frame.
    pub fn ping(timestamp: i64) -> Self {
        Self {
            message: Some(Value::from(timestamp)),
            ..Self::control(FrameType::Ping)
        }
    }

    /// Close notice.
    pub fn disconnect(reason: DisconnectReason) -> Self {
        Self {
            reason: Some(reason.as_str().to_owned()),
            reconnect: Some(reason.reconnect()),
            ..Self::control(FrameType::Disconnect)
        }
    }

    /// Subscription accepted for `identifier`.
    pub fn confirm_subscription(identifier: &str) -> Self {
        Self {
            identifier: Some(identifier.to_owned()),
            ..Self::control(FrameType::ConfirmSubscription)
        }
    }

    /// Subscription denied for `identifier`.
    pub fn reject_subscription(identifier: &str) -> Self {
        Self {
            identifier: Some(identifier.to_owned()),
            ..Self::control(FrameType::RejectSubscription)
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> String {
        // Only string keys and JSON values: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Why the gateway closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The backend denied the handshake.
    Unauthorized,
    /// The backend could not be reached or is saturated.
    ServerError,
    /// The backend asked to close the connection.
    Remote,
    /// The gateway is shutting down.
    ServerRestart,
    /// The connection stopped answering heartbeats or its buffer overflowed.
    Faulted,
}

impl DisconnectReason {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::ServerError => "server_error",
            Self::Remote => "remote",
            Self::ServerRestart => "server_restart",
            Self::Faulted => "faulted",
        }
    }

    /// Whether clients should attempt to reconnect.
    pub fn reconnect(self) -> bool {
        !matches!(self, Self::Unauthorized | Self::Remote)
    }
}
