//! A connection's membership in one stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// (connection, stream) pair plus the backend-supplied channel state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Stream name.
    pub stream: String,
    /// Channel identifier that requested the stream; `None` for streams
    /// attached during `connect`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Opaque backend state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl Subscription {
    /// Create a subscription.
    pub fn new(
        connection_id: ConnectionId,
        stream: impl Into<String>,
        identifier: Option<String>,
        state: Option<Value>,
    ) -> Self {
        Self {
            connection_id,
            stream: stream.into(),
            identifier,
            state,
        }
    }

    /// Whether this subscription was requested by `identifier`.
    pub fn belongs_to(&self, identifier: &str) -> bool {
        self.identifier.as_deref() == Some(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belongs_to_matches_identifier() {
        let sub = Subscription::new(ConnectionId::from("c1"), "room-1", Some("chan".into()), None);
        assert!(sub.belongs_to("chan"));
        assert!(!sub.belongs_to("other"));
    }

    #[test]
    fn connect_level_subscription_belongs_to_no_channel() {
        let sub = Subscription::new(ConnectionId::from("c1"), "room-1", None, None);
        assert!(!sub.belongs_to(""));
    }
}
