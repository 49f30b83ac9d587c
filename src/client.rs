use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use crate::error::EconError;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Failure below the HTTP layer: no status line was received.
#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout(String),
    Network(String),
}

impl TransportError {
    fn message(&self) -> &str {
        match self {
            TransportError::Timeout(msg) | TransportError::Network(msg) => msg,
        }
    }
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, EconError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("econ-data/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EconError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/csv, */*"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| EconError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().map_err(classify_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base, ...
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(2u32.pow(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
        }
    }
}

pub trait OecdClient: Send + Sync {
    fn fetch_csv(&self, url: &str) -> Result<String, EconError>;
}

#[derive(Clone)]
pub struct OecdHttpClient<T: Transport = ReqwestTransport> {
    transport: T,
    retry: RetryPolicy,
}

impl OecdHttpClient<ReqwestTransport> {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, EconError> {
        Ok(Self::with_transport(ReqwestTransport::new(timeout)?, retry))
    }
}

impl<T: Transport> OecdHttpClient<T> {
    pub fn with_transport(transport: T, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send_with_retries(&self, url: &str) -> Result<String, EconError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let start = Instant::now();
            let result = self.transport.get(url);
            let latency_ms = start.elapsed().as_millis() as u64;

            let failure = match result {
                Ok(response) if (200..300).contains(&response.status) => {
                    info!(
                        method = "GET",
                        url,
                        attempt,
                        status = response.status,
                        latency_ms,
                        bytes = response.body.len(),
                        "oecd.response"
                    );
                    return Ok(response.body);
                }
                Ok(response) if is_retryable_status(response.status) => {
                    warn!(
                        method = "GET",
                        url,
                        attempt,
                        status = response.status,
                        latency_ms,
                        "oecd.server_error"
                    );
                    EconError::fetch(Some(response.status), summarize_body(&response.body))
                }
                Ok(response) => {
                    warn!(
                        method = "GET",
                        url,
                        attempt,
                        status = response.status,
                        latency_ms,
                        "oecd.rejected"
                    );
                    return Err(EconError::fetch(
                        Some(response.status),
                        summarize_body(&response.body),
                    ));
                }
                Err(err) => {
                    warn!(
                        method = "GET",
                        url,
                        attempt,
                        latency_ms,
                        error = err.message(),
                        "oecd.transport_error"
                    );
                    EconError::fetch(None, err.message())
                }
            };

            if attempt >= max_attempts {
                warn!(url, attempts = attempt, "oecd.retries_exhausted");
                return Err(failure);
            }
            let delay = self.retry.delay_after(attempt);
            info!(url, delay_ms = delay.as_millis() as u64, "oecd.retry_wait");
            thread::sleep(delay);
        }
    }
}

impl<T: Transport> OecdClient for OecdHttpClient<T> {
    fn fetch_csv(&self, url: &str) -> Result<String, EconError> {
        self.send_with_retries(url)
    }
}

fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(200).collect()
}
