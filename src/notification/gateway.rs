use crate::config::GatewayConfig;
use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Serialize;

/// Why a single delivery attempt failed
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited by messaging gateway (429)")]
    Throttled,
    #[error("messaging gateway error ({0})")]
    Status(StatusCode),
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
    options: SendOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendOptions {
    delay: u32,
    link_preview: bool,
}

/// HTTP client for the messaging gateway
///
/// Endpoint: POST {api_url}/message/sendText/{instance_id}
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    url: String,
    api_key: String,
    recipient: String,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let url = format!(
            "{}/message/sendText/{}",
            config.api_url.trim_end_matches('/'),
            config.instance_id
        );

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            recipient: config.recipient.clone(),
        })
    }

    /// One delivery attempt; any 2xx is success
    pub async fn send_text(&self, text: &str) -> Result<(), GatewayError> {
        let body = SendTextRequest {
            number: &self.recipient,
            text,
            options: SendOptions {
                delay: 0,
                link_preview: false,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Throttled);
        }
        if !status.is_success() {
            return Err(GatewayError::Status(status));
        }

        Ok(())
    }
}
