//! Configuration module for the plant simulator.
//!
//! This module provides environment-based configuration: the API base URL,
//! HTTP timeout and retry budget, and the location of the pacing file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default API URL for the plant monitoring backend
const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of attempts per request (first try included)
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound for the attempt budget; backoff is uncapped so this keeps
/// the worst case wait bounded.
const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Default pacing file, relative to the working directory
pub const DEFAULT_PACING_FILE: &str = "simulator_config.json";

/// Configuration for the plant simulator.
///
/// All settings can be configured via environment variables:
/// - `API_URL`: backend base URL (default: http://localhost:3000)
/// - `SIMULATOR_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 10)
/// - `SIMULATOR_MAX_ATTEMPTS`: attempts per request (default: 5)
/// - `SIMULATOR_PACING_FILE`: pacing file path (default: simulator_config.json)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for the plant monitoring API, without trailing slash
    pub api_url: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of attempts for a request, retries included
    pub max_attempts: u32,

    /// Path of the hot-reloaded pacing file
    pub pacing_file: PathBuf,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `API_URL` is empty
    /// - `SIMULATOR_REQUEST_TIMEOUT_SECS` is not a positive number
    /// - `SIMULATOR_MAX_ATTEMPTS` is not a number in `1..=10`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use plant_simulator::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("API URL: {}", config.api_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(ConfigError {
                message: "API URL must not be empty".to_string(),
                env_var: Some("API_URL".to_string()),
            });
        }

        let request_timeout = Duration::from_secs(Self::parse_request_timeout()?);
        let max_attempts = Self::parse_max_attempts()?;

        let pacing_file = env::var("SIMULATOR_PACING_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PACING_FILE));

        Ok(Self {
            api_url,
            request_timeout,
            max_attempts,
            pacing_file,
        })
    }

    fn parse_request_timeout() -> Result<u64, ConfigError> {
        let env_var = "SIMULATOR_REQUEST_TIMEOUT_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if secs == 0 {
                    return Err(ConfigError {
                        message: "request timeout must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(secs)
            }
            Err(_) => Ok(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    fn parse_max_attempts() -> Result<u32, ConfigError> {
        let env_var = "SIMULATOR_MAX_ATTEMPTS";

        match env::var(env_var) {
            Ok(value) => {
                let attempts: u32 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if attempts == 0 {
                    return Err(ConfigError {
                        message: "max attempts must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if attempts > MAX_ATTEMPTS_LIMIT {
                    return Err(ConfigError {
                        message: format!(
                            "max attempts {} exceeds maximum allowed ({})",
                            attempts, MAX_ATTEMPTS_LIMIT
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(attempts)
            }
            Err(_) => Ok(DEFAULT_MAX_ATTEMPTS),
        }
    }

    /// `GET`/`POST /api/v1/plants`
    pub fn plants_url(&self) -> String {
        format!("{}/api/v1/plants", self.api_url)
    }

    /// `GET`/`POST /api/v1/plants/{plantId}/sensors`
    pub fn plant_sensors_url(&self, plant_id: &str) -> String {
        format!("{}/api/v1/plants/{}/sensors", self.api_url, plant_id)
    }

    /// `PUT /api/v1/sensors/{sensorId}/threshold`
    pub fn threshold_url(&self, sensor_id: &str) -> String {
        format!("{}/api/v1/sensors/{}/threshold", self.api_url, sensor_id)
    }

    /// `POST /api/v1/readings/batch`
    pub fn batch_url(&self) -> String {
        format!("{}/api/v1/readings/batch", self.api_url)
    }

    /// Build a config pointing at `api_url` with defaults for everything else.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pacing_file: PathBuf::from(DEFAULT_PACING_FILE),
        }
    }
}
