//! Plant Simulator Library
//!
//! This library seeds and loads the plant monitoring API with synthetic
//! sensor data:
//!
//! - **config**: Environment-based configuration
//! - **generator**: Sensor categories, value ranges and reading wire types
//! - **client**: HTTP client with exponential backoff retries
//! - **provision**: Get-or-create of the plant, its sensors and thresholds
//! - **emitter**: Batch assembly and submission
//! - **pacing**: Variable-speed simulator driven by a hot-reloaded pacing file
//! - **load_test**: Fixed-count load test with throughput report
//!
//! # Example
//!
//! ```no_run
//! use plant_simulator::client::ApiClient;
//! use plant_simulator::config::Config;
//! use plant_simulator::load_test::{run_load_test, LoadTestOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = ApiClient::new(&config).expect("Failed to create client");
//!
//!     let options = LoadTestOptions::new("Planta de Carga", 10_000, 50);
//!     match run_load_test(&client, &options).await {
//!         Ok(report) => println!("sent {} readings", report.total_sent),
//!         Err(e) => eprintln!("load test failed: {}", e),
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod emitter;
pub mod generator;
pub mod pacing;
pub mod provision;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root for convenience
pub use client::{ApiClient, ClientError, ClientStats, RetryPolicy};
pub use config::{Config, ConfigError};
pub use emitter::{emit_batch, EmitError};
pub use generator::{generate_value, Reading, ReadingBatch, SensorType};
pub use load_test::{run_load_test, LoadPlan, LoadReport, LoadTestError, LoadTestOptions};
pub use pacing::{run_simulator, PacingConfig, SimulatorOptions, SimulatorStats};
pub use provision::{
    default_catalog, ensure_plant, ensure_sensors, get_or_create, Plant, ProvisionError,
    Provisioned, Sensor, SensorSpec, Threshold,
};
