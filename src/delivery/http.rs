use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::{Transport, TransportError};

/// Build the HTTP client shared by delivery and the probes.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("radar-agent/", env!("CARGO_PKG_VERSION")))
        .build()
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connection(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &Url, body: &Value) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::debug!("Ingestion API answered {status} for {url}: {text}");
        }
        Ok(status.as_u16())
    }
}
