use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Transport seam for probes. An `Err` means no HTTP response was obtained
/// (connection refused, timeout, DNS failure, body read failure); any status
/// code, including 4xx/5xx, is an `Ok` response.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }
}

pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status_code = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse {
            status_code,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Response { status_code: u16, body: String },
    TransportError(String),
}

/// Scripted client for tests. Each URL maps to a sequence of outcomes; the
/// n-th call gets the n-th outcome and the last one repeats.
pub struct MockHttpClient {
    scripts: HashMap<String, Vec<MockOutcome>>,
    default_outcome: MockOutcome,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_outcome: MockOutcome::Response {
                status_code: 404,
                body: "Not Found".to_string(),
            },
            delay: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_response(self, url: &str, status_code: u16, body: &str) -> Self {
        self.with_outcomes(
            url,
            vec![MockOutcome::Response {
                status_code,
                body: body.to_string(),
            }],
        )
    }

    pub fn with_transport_error(self, url: &str, message: &str) -> Self {
        self.with_outcomes(url, vec![MockOutcome::TransportError(message.to_string())])
    }

    pub fn with_outcomes(mut self, url: &str, outcomes: Vec<MockOutcome>) -> Self {
        self.scripts.insert(url.to_string(), outcomes);
        self
    }

    pub fn with_default_response(mut self, status_code: u16, body: &str) -> Self {
        self.default_outcome = MockOutcome::Response {
            status_code,
            body: body.to_string(),
        };
        self
    }

    /// Every call sleeps this long (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = match self.scripts.get(url) {
            Some(outcomes) if !outcomes.is_empty() => {
                &outcomes[call_index.min(outcomes.len() - 1)]
            }
            _ => &self.default_outcome,
        };

        match outcome {
            MockOutcome::Response { status_code, body } => Ok(HttpResponse {
                status_code: *status_code,
                body: body.clone(),
            }),
            MockOutcome::TransportError(message) => Err(message.clone().into()),
        }
    }
}
