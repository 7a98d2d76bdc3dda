// HTTP transport shared by the Ollama clients
// Owns the ureq agent, request timeout and transport-level retry policy


use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Why a request ultimately failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request exceeded the agent's global timeout
    #[error("timed out: {0}")]
    Timeout(String),
    /// Server answered with a status code ureq treats as an error
    #[error("HTTP {0}")]
    Status(u16),
    /// Connection, I/O or protocol failure
    #[error("{0}")]
    Failed(String),
    /// The response body was not the expected JSON
    #[error("invalid response: {0}")]
    Decode(String),
}

/// JSON-over-HTTP client bound to one base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    agent: ureq::Agent,
    timeout: Duration,
    retry_attempts: u32,
    backoff_unit: Duration,
}

impl HttpTransport {
    #[inline]
    pub fn new(base_url: Url, timeout: Duration, retry_attempts: u32) -> Self {
        Self {
            base_url,
            agent: build_agent(timeout),
            timeout,
            retry_attempts: retry_attempts.max(1),
            backoff_unit: Duration::from_secs(1),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay for exponential backoff between attempts
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// GET `path` and decode the JSON response
    #[inline]
    pub fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, TransportError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let body = self.request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// POST `body` as JSON to `path` and decode the JSON response
    #[inline]
    pub fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let url = self.endpoint(path)?;
        let request_json =
            serde_json::to_string(body).map_err(|e| TransportError::Failed(e.to_string()))?;
        debug!("POST {} ({} bytes)", url, request_json.len());

        let response = self.request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        serde_json::from_str(&response).map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::Failed(format!("Failed to build URL for {}: {}", path, e)))
    }

    fn request_with_retry<F>(&self, mut request_fn: F) -> Result<String, TransportError>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let failure = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            TransportError::Status(*status)
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(TransportError::Status(*status));
                        }
                        ureq::Error::Timeout(_) => {
                            warn!(
                                "Request timed out after {:?}, attempt {}/{}",
                                self.timeout, attempt, self.retry_attempts
                            );
                            TransportError::Timeout(format!(
                                "no response from {} within {:?}",
                                self.base_url, self.timeout
                            ))
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            TransportError::Failed(error.to_string())
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            return Err(TransportError::Failed(error.to_string()));
                        }
                    };

                    last_error = Some(failure);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_unit * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) as u32;
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error
            .unwrap_or_else(|| TransportError::Failed("Request failed after retries".to_string())))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
