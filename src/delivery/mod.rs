//! Outbound delivery of telemetry to the ingestion API.
//!
//! Every payload kind goes to its own endpoint. Server errors and network
//! failures are retried with exponential backoff; anything else that is not a
//! success is dropped right away. There is no persistent retry queue: after the
//! last attempt the payload is logged and discarded.

pub mod http;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

pub use payload::{
    ContainerStatus, DeliveryPayload, LatencySample, LogRecord, PayloadKind, StatusEvent,
    UptimeSample,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{kind} payload rejected by {endpoint} with status {status}")]
    Rejected {
        kind: String,
        endpoint: String,
        status: u16,
    },
    #[error("{kind} payload dropped after {attempts} attempts to {endpoint}: {last}")]
    RetriesExhausted {
        kind: String,
        endpoint: String,
        attempts: u32,
        last: String,
    },
    #[error("Unable to serialize {kind} payload: {reason}")]
    Serialize { kind: String, reason: String },
}

/// Sends one JSON body and reports the HTTP status code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &Url, body: &Value) -> Result<u16, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub logs: Url,
    pub status: Url,
    pub latency: Url,
    pub uptime: Url,
}

impl Endpoints {
    pub fn for_kind(&self, kind: PayloadKind) -> &Url {
        match kind {
            PayloadKind::Log => &self.logs,
            PayloadKind::Status => &self.status,
            PayloadKind::Latency => &self.latency,
            PayloadKind::Uptime => &self.uptime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for every following one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoints: Arc<Endpoints>,
    retry: RetryPolicy,
    user_id: Option<String>,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        retry: RetryPolicy,
        user_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            endpoints: Arc::new(endpoints),
            retry,
            user_id,
        }
    }

    /// Deliver a payload to the endpoint configured for its kind.
    /// Returns the number of attempts it took.
    pub async fn deliver(&self, payload: impl Into<DeliveryPayload>) -> Result<u32, DeliveryError> {
        let payload = payload.into();
        let endpoint = self.endpoints.for_kind(payload.kind()).clone();
        self.deliver_to(&endpoint, payload).await
    }

    pub async fn deliver_to(
        &self,
        endpoint: &Url,
        payload: DeliveryPayload,
    ) -> Result<u32, DeliveryError> {
        let kind = payload.kind();
        let body = self.body(&payload)?;

        let mut attempt = 0;
        let last = loop {
            attempt += 1;
            let failure = match self.transport.post(endpoint, &body).await {
                Ok(status) if (200..300).contains(&status) => {
                    log::debug!(
                        "Delivered {} payload to {endpoint} (attempt {attempt})",
                        kind.as_ref()
                    );
                    return Ok(attempt);
                }
                Ok(status) if (500..600).contains(&status) => format!("status {status}"),
                Ok(status) => {
                    let err = DeliveryError::Rejected {
                        kind: kind.as_ref().to_string(),
                        endpoint: endpoint.to_string(),
                        status,
                    };
                    log::error!("{err}");
                    return Err(err);
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.retry.max_attempts {
                break failure;
            }
            let delay = self.retry.delay_after(attempt);
            log::warn!(
                "Delivery of {} payload to {endpoint} failed (attempt {attempt}): {failure}. Retrying in {delay:?}",
                kind.as_ref()
            );
            tokio::time::sleep(delay).await;
        };

        let err = DeliveryError::RetriesExhausted {
            kind: kind.as_ref().to_string(),
            endpoint: endpoint.to_string(),
            attempts: attempt,
            last,
        };
        log::error!("{err}");
        Err(err)
    }

    fn body(&self, payload: &DeliveryPayload) -> Result<Value, DeliveryError> {
        let mut body = serde_json::to_value(payload).map_err(|e| DeliveryError::Serialize {
            kind: payload.kind().as_ref().to_string(),
            reason: e.to_string(),
        })?;
        if let (Some(user_id), Value::Object(map)) = (&self.user_id, &mut body) {
            map.insert("user_id".to_string(), Value::String(user_id.clone()));
        }
        Ok(body)
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted transport that records every request.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingTransport {
        responses: Mutex<VecDeque<Result<u16, TransportError>>>,
        pub requests: Mutex<Vec<(Url, Value, tokio::time::Instant)>>,
    }

    impl RecordingTransport {
        /// Responses are replayed in order; once exhausted every request gets 201.
        pub fn scripted(responses: Vec<Result<u16, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        pub fn bodies(&self) -> Vec<Value> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, body, _)| body.clone())
                .collect()
        }

        pub fn bodies_for(&self, path: &str) -> Vec<Value> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(url, _, _)| url.path() == path)
                .map(|(_, body, _)| body.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(&self, url: &Url, body: &Value) -> Result<u16, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.clone(), body.clone(), tokio::time::Instant::now()));
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(201))
        }
    }

    pub fn endpoints() -> Endpoints {
        let base = Url::parse("http://ingest.test").unwrap();
        Endpoints {
            logs: base.join("/api/logs").unwrap(),
            status: base.join("/api/status").unwrap(),
            latency: base.join("/api/latency").unwrap(),
            uptime: base.join("/api/uptime").unwrap(),
        }
    }

    pub fn client(transport: Arc<RecordingTransport>) -> DeliveryClient {
        DeliveryClient::new(transport, endpoints(), RetryPolicy::default(), None)
    }
}
