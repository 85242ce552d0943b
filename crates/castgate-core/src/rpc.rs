//! RPC envelope exchanged between the gateway and the application backend.
//!
//! The gateway sends one [`RpcRequest`] per lifecycle event and interprets
//! the [`RpcReply`] uniformly: status, transmissions, stream instructions,
//! and the stop flag. Channel logic lives entirely on the backend side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// Lifecycle event carried by an RPC request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcCommandType {
    /// Client handshake; authenticates the connection.
    Connect,
    /// Inbound client action (subscribe, unsubscribe, message).
    Command,
    /// Connection teardown notification.
    Disconnect,
}

impl RpcCommandType {
    /// Lowercase name used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Command => "command",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Request sent to the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Lifecycle event.
    #[serde(rename = "type")]
    pub command_type: RpcCommandType,
    /// Connection the event belongs to.
    pub connection_id: ConnectionId,
    /// Identity attributes persisted at connect time (`None` before).
    pub identifiers: Option<String>,
    /// Event payload.
    pub payload: Value,
}

impl RpcRequest {
    /// Build a `connect` request from the client handshake.
    pub fn connect(connection_id: ConnectionId, env: &ConnectionEnv) -> Self {
        Self {
            command_type: RpcCommandType::Connect,
            connection_id,
            identifiers: None,
            payload: serde_json::json!({ "env": env }),
        }
    }

    /// Build a `command` request for an inbound client action.
    pub fn command(
        connection_id: ConnectionId,
        identifiers: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            command_type: RpcCommandType::Command,
            connection_id,
            identifiers,
            payload,
        }
    }

    /// Build a `disconnect` request.
    pub fn disconnect(
        connection_id: ConnectionId,
        identifiers: Option<String>,
        subscriptions: Vec<String>,
        reason: &str,
    ) -> Self {
        Self {
            command_type: RpcCommandType::Disconnect,
            connection_id,
            identifiers,
            payload: serde_json::json!({
                "subscriptions": subscriptions,
                "reason": reason,
            }),
        }
    }
}

/// Transport-level facts about the client handshake forwarded to `connect`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEnv {
    /// Request URL of the upgrade (path and query).
    pub url: String,
    /// Allow-listed request headers, lowercase names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Outcome reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcStatus {
    /// Request accepted.
    Ok,
    /// Backend explicitly denied the request.
    Failure,
    /// Backend failed to process the request.
    Error,
}

/// Stream subscribe/unsubscribe instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamInstructions {
    /// Streams to add for the connection.
    pub subscribe: Vec<String>,
    /// Streams to remove from the connection.
    pub unsubscribe: Vec<String>,
}

impl StreamInstructions {
    /// Whether the reply carries no stream changes.
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Reply returned by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReply {
    /// Outcome.
    pub status: RpcStatus,
    /// Frames written verbatim to the client. Strings are sent as-is,
    /// other values are JSON-encoded.
    #[serde(default)]
    pub transmissions: Vec<Value>,
    /// Stream instructions applied to the connection.
    #[serde(default)]
    pub streams: StreamInstructions,
    /// Drop every stream owned by the command's channel identifier.
    #[serde(default)]
    pub stop_streams: bool,
    /// Close the connection after applying the reply.
    #[serde(default)]
    pub stop: bool,
    /// Identity attributes to persist (honored on `connect` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<String>,
    /// Opaque channel state stored with the channel's subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Human-readable reason for failure/error statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl RpcReply {
    /// An empty `ok` reply.
    pub fn ok() -> Self {
        Self::with_status(RpcStatus::Ok)
    }

    /// An empty `failure` reply.
    pub fn failure() -> Self {
        Self::with_status(RpcStatus::Failure)
    }

    /// An empty `error` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_msg: Some(message.into()),
            ..Self::with_status(RpcStatus::Error)
        }
    }

    fn with_status(status: RpcStatus) -> Self {
        Self {
            status,
            transmissions: Vec::new(),
            streams: StreamInstructions::default(),
            stop_streams: false,
            stop: false,
            identifiers: None,
            state: None,
            error_msg: None,
        }
    }

    /// Whether the backend accepted the request.
    pub fn is_ok(&self) -> bool {
        self.status == RpcStatus::Ok
    }
}
