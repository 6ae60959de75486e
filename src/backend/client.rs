//! HTTP side of the gateway: one GET or PUT per TFTP session.

use crate::backend::path::path_segments;
use crate::common::{BackendConfig, GatewayConfig, GatewayError, Result};
use anyhow::Context;
use bytes::{Bytes, BytesMut};
use rand::Rng;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Backoff for transport-level failures. Status codes are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            backoff: config.retry_backoff(),
        }
    }

    /// Exponential delay with up to 50% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = (base.as_millis() / 2) as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// Stateless apart from the pooled `reqwest::Client`; share it behind an `Arc`.
#[derive(Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    max_object_size: u64,
}

impl BackendClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let base_url = config.base_url()?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.backend.timeout())
            .connect_timeout(config.backend.connect_timeout())
            .user_agent(concat!("tftp-gateway/", env!("CARGO_PKG_VERSION")));
        if !config.backend.system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            retry: RetryPolicy::from_config(&config.backend),
            max_object_size: config.transfer.max_transfer_size,
        })
    }

    /// Join the base URL with `path`. The path is normalized again here, so
    /// a caller that skipped normalization still cannot leave the root.
    pub fn object_url(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("base URL {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(path_segments(path));
        Ok(url)
    }

    /// GET the whole object.
    pub async fn fetch(&self, path: &str, forwarded_for: &str) -> Result<Bytes> {
        let url = self.object_url(path)?;
        tracing::debug!(%url, %forwarded_for, "GET");

        let response = self
            .send_with_retry(|| {
                self.http
                    .get(url.clone())
                    .header(X_FORWARDED_FOR, forwarded_for)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, url.path()));
        }
        self.read_body(response).await
    }

    /// PUT the whole object. Only 200 and 201 count as stored.
    pub async fn store(&self, path: &str, forwarded_for: &str, body: Bytes) -> Result<()> {
        let url = self.object_url(path)?;
        let len = body.len();
        tracing::debug!(%url, %forwarded_for, bytes = len, "PUT");

        let response = self
            .send_with_retry(|| {
                self.http
                    .put(url.clone())
                    .header(X_FORWARDED_FOR, forwarded_for)
                    .header(CONTENT_LENGTH, len)
                    .body(body.clone())
            })
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(GatewayError::from_status(status, url.path())),
        }
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.retry.attempts && (err.is_connect() || err.is_timeout()) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "backend request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Buffer the body, enforcing the per-session cap.
    async fn read_body(&self, mut response: Response) -> Result<Bytes> {
        let limit = self.max_object_size;
        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(GatewayError::TooLarge { size: len, limit });
            }
        }

        let capacity = response.content_length().unwrap_or(0) as usize;
        let mut body = BytesMut::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await? {
            let size = (body.len() + chunk.len()) as u64;
            if size > limit {
                return Err(GatewayError::TooLarge { size, limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}
