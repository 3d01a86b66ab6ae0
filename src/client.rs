//! HTTP client module for the plant monitoring API.
//!
//! This module provides the retrying request executor every remote call goes
//! through: transient failures (network errors and 500/502/503/504) are
//! retried with exponential backoff, everything else is handed back to the
//! caller as is. It also holds the helpers for reading the API's
//! `{data: ...}` response envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::Config;

/// Default exponential backoff base.
const DEFAULT_BACKOFF_BASE: u32 = 2;

/// Status codes treated like a network failure.
const TRANSIENT_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Single object envelope: `{"data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// List payload: `{"data": {"items": [...]}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server answered with a status the caller does not accept
    Status { code: StatusCode, message: String },

    /// Failed to parse or build a body
    Parse(String),

    /// All attempts failed with transient errors
    RetriesExhausted { attempts: u32, last_error: String },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Unexpected status ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse body: {}", e),
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "All {} attempts failed. Last error: {}",
                    attempts, last_error
                )
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

impl ClientError {
    /// True when the request never produced a usable response.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ClientError::RetriesExhausted { .. })
    }
}

/// Attempt budget and backoff schedule.
///
/// The delay after failed attempt `n` (1-based) is `unit * base^n`, with no
/// upper cap. The API contract uses one second as the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first try included
    pub max_attempts: u32,

    /// Exponential base
    pub backoff_base: u32,

    /// Duration of one backoff step
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Policy with the given attempt budget and the default base/unit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Use a different backoff unit (tests compress seconds to millis).
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(self.backoff_base.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Counters for requests issued through an [`ApiClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// HTTP attempts made, retries included
    pub attempts: u64,

    /// Attempts that were followed by a backoff and retry
    pub retries: u64,

    /// Calls that ended in `RetriesExhausted`
    pub exhausted: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    attempts: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
}

/// Retrying HTTP client for the plant monitoring API.
///
/// One `reqwest::Client` is reused for every call so connections are pooled.
///
/// # Example
///
/// ```no_run
/// use plant_simulator::client::ApiClient;
/// use plant_simulator::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let client = ApiClient::new(&config).expect("Failed to create client");
///
///     match client.get(&config.plants_url()).await {
///         Ok(response) => println!("status {}", response.status()),
///         Err(e) => eprintln!("request failed: {}", e),
///     }
/// }
/// ```
pub struct ApiClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Endpoint layout and timeouts
    config: Config,

    /// Attempt budget and backoff
    policy: RetryPolicy,

    stats: StatsCounters,
}

impl ApiClient {
    /// Create a new client from the configuration, with a one second
    /// backoff unit.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_policy(config, RetryPolicy::new(config.max_attempts))
    }

    /// Create a new client with an explicit retry policy.
    pub fn with_policy(config: &Config, policy: RetryPolicy) -> Result<Self, ClientError> {
        if policy.max_attempts == 0 {
            return Err(ClientError::Config(
                "retry policy needs at least one attempt".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            policy,
            stats: StatsCounters::default(),
        })
    }

    /// Issue one request, retrying transient failures.
    ///
    /// # Retryable Errors
    ///
    /// - Network errors (connection refused, timeouts, ...)
    /// - 500, 502, 503 and 504 responses
    ///
    /// Any other response, 4xx included, is returned immediately. When every
    /// attempt failed transiently the result is
    /// `ClientError::RetriesExhausted`.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ClientError> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) if is_transient_status(response.status()) => {
                    last_error = format!("server error {}", response.status());
                }
                Ok(response) => {
                    debug!(
                        method = %method,
                        url = url,
                        status = response.status().as_u16(),
                        attempt = attempt,
                        "Request completed"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    last_error = ClientError::from(e).to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff_delay(attempt);
                warn!(
                    method = %method,
                    url = url,
                    error = %last_error,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        error!(
            method = %method,
            url = url,
            attempts = max_attempts,
            error = %last_error,
            "Request failed after all attempts"
        );

        Err(ClientError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// `GET url` through the retry loop.
    pub async fn get(&self, url: &str) -> Result<Response, ClientError> {
        self.execute(Method::GET, url, None).await
    }

    /// `POST url` with a JSON body through the retry loop.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        let body = to_json(body)?;
        self.execute(Method::POST, url, Some(&body)).await
    }

    /// `PUT url` with a JSON body through the retry loop.
    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        let body = to_json(body)?;
        self.execute(Method::PUT, url, Some(&body)).await
    }

    /// Fetch a `{data: {items: [...]}}` list.
    ///
    /// Lists are read defensively: exhausted retries, an unexpected status
    /// or a body that does not match the envelope all yield an empty list,
    /// and items that do not decode as `T` are dropped one by one.
    pub async fn fetch_list<T: DeserializeOwned>(&self, url: &str) -> Vec<T> {
        let response = match self.get(url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = url, error = %e, "List request failed, assuming empty list");
                return Vec::new();
            }
        };

        let items = match read_data::<ItemList<serde_json::Value>>(response, &[]).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(url = url, error = %e, "Unreadable list response, assuming empty list");
                return Vec::new();
            }
        };

        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    debug!(url = url, error = %e, "Skipping unreadable list item");
                    None
                }
            })
            .collect()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Snapshot of the request counters.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// True for the statuses retried like a network error.
pub fn is_transient_status(status: StatusCode) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Check the status against `accepted` (empty accepts anything) and decode
/// the `data` field of the envelope.
pub async fn read_data<T: DeserializeOwned>(
    response: Response,
    accepted: &[StatusCode],
) -> Result<T, ClientError> {
    let status = response.status();

    if !accepted.is_empty() && !accepted.contains(&status) {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::Status {
            code: status,
            message,
        });
    }

    let body = response.text().await?;
    serde_json::from_str::<Envelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|e| ClientError::Parse(e.to_string()))
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::Parse(e.to_string()))
}
