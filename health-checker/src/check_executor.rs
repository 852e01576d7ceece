use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{self, Instant};
use tracing::{debug, instrument, warn};

use crate::config::HealthCheckerConfig;
use crate::field_path::field_exists;
use crate::http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
use crate::models::{CheckStatus, ExecutionResult, ProbeSpec};

pub const INVALID_JSON_ERROR: &str = "Response is not valid JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Runs probes. Holds no per-probe state, so one executor is shared by the
/// scheduler and the API.
pub struct CheckExecutor {
    http_client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
}

impl CheckExecutor {
    pub fn new(http_client: Arc<dyn HttpClient>, retry: RetryPolicy) -> Self {
        Self { http_client, retry }
    }

    pub fn from_config(config: &HealthCheckerConfig) -> Result<Self, reqwest::Error> {
        let http_client =
            ReqwestHttpClient::new(config.http_timeout, config.http_connect_timeout)?;
        Ok(Self::new(Arc::new(http_client), config.retry_policy()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    #[instrument(skip(self, spec), fields(url = %spec.url(), method = spec.method().as_str()))]
    pub async fn execute(&self, spec: &ProbeSpec) -> ExecutionResult {
        let (response, latency_ms) = match self.fetch_with_retries(spec.url()).await {
            Ok(fetched) => fetched,
            Err(failure) => return failure,
        };

        let document: Value = match response.json() {
            Ok(document) => document,
            Err(e) => {
                debug!(status_code = response.status_code(), error = %e, "Probe body is not JSON");
                return ExecutionResult {
                    status: CheckStatus::Fail,
                    missing_fields: Vec::new(),
                    status_code: Some(response.status_code()),
                    latency_ms,
                    error: Some(INVALID_JSON_ERROR.to_string()),
                };
            }
        };

        let missing_fields: Vec<String> = spec
            .required_fields()
            .iter()
            .filter(|path| !field_exists(&document, path))
            .cloned()
            .collect();

        let status_matches = response.status_code() == spec.expected_status_code();
        let latency_ok = spec
            .latency_threshold_ms()
            .map_or(true, |threshold| latency_ms <= threshold as f64);

        let status = if missing_fields.is_empty() && status_matches && latency_ok {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };

        debug!(
            status = %status,
            status_code = response.status_code(),
            latency_ms,
            missing = missing_fields.len(),
            "Probe evaluated"
        );

        ExecutionResult {
            status,
            missing_fields,
            status_code: Some(response.status_code()),
            latency_ms,
            error: None,
        }
    }

    /// Returns the first response obtained together with the latency of the
    /// attempt that produced it, or the final FAIL result once every attempt
    /// failed at the transport level.
    async fn fetch_with_retries(
        &self,
        url: &str,
    ) -> Result<(HttpResponse, f64), ExecutionResult> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let outcome = self.http_client.get(url).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(response) => return Ok((response, latency_ms)),
                Err(e) if attempt + 1 < attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Probe request failed, retrying"
                    );
                    time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Probe request failed on final attempt");
                    return Err(ExecutionResult {
                        status: CheckStatus::Fail,
                        missing_fields: Vec::new(),
                        status_code: None,
                        latency_ms,
                        error: Some(format!("Request failed after {attempts} attempts: {e}")),
                    });
                }
            }
        }
    }
}
