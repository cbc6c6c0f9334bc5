//! HTTP command client.

use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_core::retry::command_retry_delay;
use tether_core::wire::PermissionResponse;
use tether_settings::{CommandSettings, EndpointSettings};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::destination::Destination;
use super::errors::CommandError;

/// Health check path.
const HEALTH_PATH: &str = "/health";
/// Hook-bridge permission response path.
const PERMISSION_RESPOND_PATH: &str = "/api/permissions/respond";
/// Longest error body kept in [`CommandError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Result of a successful health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Round-trip time of the check.
    pub latency: Duration,
    /// Destination class of the endpoint.
    pub destination: Destination,
}

/// Request/response client for the remote agent's command API.
///
/// Construction never fails on a bad endpoint; the problem is reported as
/// [`CommandError::Config`] by the first call.
#[derive(Clone, Debug)]
pub struct CommandClient {
    http: reqwest::Client,
    base: Result<Url, String>,
    destination: Destination,
    settings: CommandSettings,
    auth_token: Option<String>,
}

impl CommandClient {
    /// Build a client for the configured command endpoint.
    pub fn new(endpoint: &EndpointSettings, settings: CommandSettings) -> Result<Self, CommandError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(CommandError::Request)?;
        let base = parse_base(&endpoint.command_base_url);
        let destination = base
            .as_ref()
            .map_or(Destination::Remote, Destination::classify);
        debug!(
            base = %endpoint.command_base_url,
            destination = destination.as_str(),
            "command client configured"
        );
        Ok(Self {
            http,
            base,
            destination,
            settings,
            auth_token: endpoint.auth_token.clone(),
        })
    }

    /// Destination class of the endpoint.
    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Per-request timeout for regular calls.
    pub fn timeout(&self) -> Duration {
        match self.destination {
            Destination::Local => self.settings.local_timeout(),
            Destination::Remote => self.settings.remote_timeout(),
        }
    }

    /// Delay before retry `retry` (0-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let multiplier = match self.destination {
            Destination::Local => self.settings.local_backoff_multiplier,
            Destination::Remote => self.settings.remote_backoff_multiplier,
        };
        command_retry_delay(retry, self.settings.retry_base_delay(), multiplier)
    }

    /// `GET path`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CommandError> {
        self.execute(Method::GET, path, None).await
    }

    /// `DELETE path`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, CommandError> {
        self.execute(Method::DELETE, path, None).await
    }

    /// `POST path` with a JSON body. The call must be idempotent.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, CommandError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = Bytes::from(serde_json::to_vec(body)?);
        self.execute(Method::POST, path, Some(body)).await
    }

    /// Check the endpoint with its own short timeout and no retry.
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<HealthReport, CommandError> {
        let url = self.url(HEALTH_PATH)?;
        let started = Instant::now();
        let _ = self
            .send_once(Method::GET, url, None, self.settings.health_timeout())
            .await?;
        Ok(HealthReport {
            latency: started.elapsed(),
            destination: self.destination,
        })
    }

    /// Send a hook-bridge permission response. Any 2xx counts as delivered,
    /// whatever the body.
    #[instrument(skip(self, response), fields(tool_use_id = %response.tool_use_id))]
    pub async fn respond_permission(&self, response: &PermissionResponse) -> Result<(), CommandError> {
        let body = Bytes::from(serde_json::to_vec(response)?);
        let _ = self
            .execute_raw(Method::POST, PERMISSION_RESPOND_PATH, Some(body))
            .await?;
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<T, CommandError> {
        let bytes = self.execute_raw(method, path, body).await?;
        decode(&bytes)
    }

    async fn execute_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Bytes, CommandError> {
        let url = self.url(path)?;
        let timeout = self.timeout();
        let mut retry = 0u32;
        loop {
            match self
                .send_once(method.clone(), url.clone(), body.clone(), timeout)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_retryable() && retry < self.settings.max_retries => {
                    let delay = self.retry_delay(retry);
                    retry += 1;
                    counter!(
                        "command_retries_total",
                        "destination" => self.destination.as_str()
                    )
                    .increment(1);
                    warn!(
                        %method,
                        path,
                        retry,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "transient command failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes, CommandError> {
        let mut request = self
            .http
            .request(method, url)
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(CommandError::from_transport)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CommandError::Authentication {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(CommandError::from_transport)?;
        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            truncate(&mut text, MAX_ERROR_BODY);
            return Err(CommandError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(bytes)
    }

    fn url(&self, path: &str) -> Result<Url, CommandError> {
        let base = self.base.as_ref().map_err(|e| CommandError::Config(e.clone()))?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| CommandError::Config(format!("{joined}: {e}")))
    }
}

fn parse_base(raw: &str) -> Result<Url, String> {
    if raw.trim().is_empty() {
        return Err("command base URL is not configured".into());
    }
    let url = Url::parse(raw).map_err(|e| format!("{raw}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("{raw}: unsupported scheme {other}")),
    }
}

/// Empty bodies decode as JSON `null`, so `()` and `Option<T>` accept them.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CommandError> {
    let bytes = if bytes.is_empty() { b"null".as_slice() } else { bytes };
    Ok(serde_json::from_slice(bytes)?)
}

fn truncate(text: &mut String, max: usize) {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}
