//! HTTP client for the WhatsApp gateway.
//!
//! Speaks the gateway's small JSON API: `POST /send` for outbound text
//! and `GET /groups/{chat_id}/participants` for the member list. Every
//! request carries the configured bearer token and a per-request
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::gateway::{Gateway, GatewayError, Participant};

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the HTTP gateway client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpGatewayConfig {
    /// Gateway base URL, e.g. `http://localhost:3000/api`.
    pub base_url: String,
    /// Bearer token, if the gateway requires one.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Error response body from the gateway.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Participants response from the gateway.
#[derive(Debug, Deserialize)]
struct ParticipantsResponse {
    #[serde(default)]
    participants: Vec<Participant>,
}

/// Production [`Gateway`] implementation over HTTP.
pub struct HttpGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    /// Build a client with the configured timeout.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Attach the bearer token when configured.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Extract the gateway's error message from a non-success response.
    async fn api_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let message = match response.json::<ApiError>().await {
            Ok(ApiError { error: Some(detail) }) => detail.message,
            _ => format!("HTTP {status}"),
        };
        GatewayError::Api(message)
    }

    async fn post_send(&self, body: serde_json::Value) -> Result<(), GatewayError> {
        let response = self
            .authorized(self.client.post(self.url("send")))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        debug!(chat_id, len = text.len(), "sending message");
        self.post_send(json!({ "chat_id": chat_id, "text": text })).await
    }

    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError> {
        debug!(chat_id, reply_to, len = text.len(), "sending reply");
        self.post_send(json!({ "chat_id": chat_id, "text": text, "reply_to": reply_to }))
            .await
    }

    async fn group_participants(&self, chat_id: &str) -> Result<Vec<Participant>, GatewayError> {
        let response = self
            .authorized(
                self.client
                    .get(self.url(&format!("groups/{chat_id}/participants"))),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: ParticipantsResponse = response.json().await?;
        Ok(body.participants)
    }
}
