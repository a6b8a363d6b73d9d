//! Inbound gateway event shapes.
//!
//! The WhatsApp HTTP gateway delivers one JSON object per event. Only two
//! kinds are handled by the core: `message` and `group.participants`;
//! everything else deserializes to [`InboundEvent::Other`] and is
//! acknowledged as un-handled.

use serde::{Deserialize, Serialize};

/// One inbound event as delivered by the gateway webhook.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum InboundEvent {
    /// A chat message (group or private).
    #[serde(rename = "message")]
    Message {
        device_id: String,
        payload: MessagePayload,
    },

    /// A group membership change.
    #[serde(rename = "group.participants")]
    GroupParticipants {
        device_id: String,
        payload: ParticipantsPayload,
    },

    /// Any other event kind; acknowledged but not processed.
    #[serde(other)]
    Other,
}

/// Payload of a `message` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Gateway message id; replies quote it.
    pub id: String,
    /// The chat the message arrived in.
    pub chat_id: String,
    /// Sender JID.
    pub from: String,
    /// Sender display name as reported by the gateway.
    #[serde(default)]
    pub from_name: String,
    /// Message text body.
    #[serde(default)]
    pub body: String,
    /// Unix timestamp (seconds) of the message.
    pub timestamp: i64,
    /// Id of the message this one replies to, if any.
    #[serde(default)]
    pub replied_to_id: Option<String>,
    /// Body of the quoted message, if any.
    #[serde(default)]
    pub quoted_body: Option<String>,
}

/// Payload of a `group.participants` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantsPayload {
    /// The group the change occurred in.
    pub chat_id: String,
    /// Kind of membership change.
    #[serde(rename = "type")]
    pub change: ParticipantChange,
    /// Affected participant JIDs.
    pub jids: Vec<String>,
}

/// Kinds of group membership changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantChange {
    /// A participant joined the group.
    Join,
    /// A participant left (or was removed from) the group.
    Leave,
    /// A participant was promoted to group admin.
    Promote,
    /// A group admin was demoted back to plain member.
    Demote,
}
