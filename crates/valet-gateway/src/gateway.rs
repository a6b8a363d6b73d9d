//! The outbound gateway trait and its error type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway API error: {0}")]
    Api(String),

    #[error("{0}")]
    Other(String),
}

/// A group participant as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// Participant JID.
    pub jid: String,
    /// Whether the participant is a group admin upstream.
    #[serde(default)]
    pub admin: bool,
}

/// Narrow interface to the WhatsApp HTTP gateway.
///
/// The router is the only pipeline component holding a `Gateway`
/// reference; handlers reach it through their execution context.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a plain message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError>;

    /// Send a message quoting `reply_to`.
    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError>;

    /// Fetch the current participants of a group chat.
    async fn group_participants(&self, chat_id: &str) -> Result<Vec<Participant>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_admin_defaults_to_false() {
        let participant: Participant = serde_json::from_str(r#"{"jid": "a@s.whatsapp.net"}"#).unwrap();
        assert!(!participant.admin);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            GatewayError::Api("rate limited".into()).to_string(),
            "gateway API error: rate limited"
        );
        assert_eq!(GatewayError::Other("oops".into()).to_string(), "oops");
    }
}
