//! Outbound batch transport
//!
//! The relay talks to its endpoint through [`BatchTransport`] so the runner
//! can be driven against an in-process mock. [`HttpTransport`] is the real
//! thing: JSON over HTTPS with a bearer key.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::trace;

use crate::error::RelayError;
use crate::queue::RelayMessage;

/// Version string announced in heartbeats
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct BatchBody<'a> {
    session: &'a str,
    messages: &'a [RelayMessage],
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    session: &'a str,
    version: &'a str,
    uptime_secs: u64,
}

/// Delivers batches and heartbeats to the relay endpoint
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Deliver one batch; `Ok` means the endpoint accepted all of it
    async fn send_batch(&self, session: &str, messages: &[RelayMessage])
        -> Result<(), RelayError>;

    /// Announce liveness
    async fn send_heartbeat(&self, session: &str, uptime_secs: u64) -> Result<(), RelayError>;
}

/// JSON-over-HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl HttpTransport {
    /// Transport posting to `url` with `key` as bearer token
    pub fn new(url: &str, key: &str, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rigbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    async fn post<B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<(), RelayError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        trace!("POST {} -> {}", url, status);
        match status.as_u16() {
            401 | 403 => Err(RelayError::Auth {
                status: status.as_u16(),
            }),
            _ if status.is_success() => Ok(()),
            code => Err(RelayError::Server { status: code }),
        }
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn send_batch(
        &self,
        session: &str,
        messages: &[RelayMessage],
    ) -> Result<(), RelayError> {
        self.post(&self.url, &BatchBody { session, messages }).await
    }

    async fn send_heartbeat(&self, session: &str, uptime_secs: u64) -> Result<(), RelayError> {
        let url = format!("{}/heartbeat", self.url);
        self.post(
            &url,
            &HeartbeatBody {
                session,
                version: CLIENT_VERSION,
                uptime_secs,
            },
        )
        .await
    }
}
