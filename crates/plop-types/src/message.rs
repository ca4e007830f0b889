use serde::{Deserialize, Serialize};

/// Sender identity stamped on frames the relay itself originates.
pub const SERVER_SENDER: &str = "server";

/// Text carried by the `message_ack` payload.
pub const PLOP_ACK_TEXT: &str = "plop_ack";

/// Frame types exchanged over the `/connect` WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Plop,
    SyncDataBroadcast,
    Ping,
    MessageAck,
    SyncRequest,
    NewContact,
    /// Anything the relay does not understand. Logged and dropped.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plop => "plop",
            Self::SyncDataBroadcast => "sync_data_broadcast",
            Self::Ping => "ping",
            Self::MessageAck => "message_ack",
            Self::SyncRequest => "sync_request",
            Self::NewContact => "new_contact",
            Self::Unknown => "unknown",
        }
    }
}

/// Message body. Every field is optional and an absent field is not the
/// same thing as a zero value (a plop at 0.0/0.0 is still a located plop).
/// Keys the relay does not read are kept in `extra` and written back out
/// unchanged, so a relayed body round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudo: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Both coordinates present.
    pub fn location(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// One JSON text frame on the gateway, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Always overwritten with the authenticated sender on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,

    /// Set only when a message is redelivered from the offline queue.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_pending: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            to: None,
            from: None,
            payload: None,
            is_default: false,
            is_pending: false,
        }
    }

    pub fn plop(to: impl Into<String>, payload: Payload) -> Self {
        Self {
            to: Some(to.into()),
            payload: Some(payload),
            ..Self::new(MessageType::Plop)
        }
    }

    /// Acknowledgment sent back to the sender once a plop has been accepted.
    pub fn ack(sender: &str, recipient_id: &str) -> Self {
        Self {
            to: Some(sender.to_string()),
            from: Some(SERVER_SENDER.to_string()),
            payload: Some(Payload {
                recipient_id: Some(recipient_id.to_string()),
                text: Some(PLOP_ACK_TEXT.to_string()),
                ..Default::default()
            }),
            ..Self::new(MessageType::MessageAck)
        }
    }

    /// Asks a user's other devices to broadcast their sync data.
    pub fn sync_request() -> Self {
        Self {
            from: Some(SERVER_SENDER.to_string()),
            ..Self::new(MessageType::SyncRequest)
        }
    }

    /// Tells an invitation creator that someone redeemed their code.
    pub fn new_contact(user_id: &str, pseudo: &str) -> Self {
        Self {
            payload: Some(Payload {
                user_id: Some(user_id.to_string()),
                pseudo: Some(pseudo.to_string()),
                ..Default::default()
            }),
            ..Self::new(MessageType::NewContact)
        }
    }

    /// Recipient, if non-empty.
    pub fn recipient(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| !to.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.text.as_deref())
    }
}
