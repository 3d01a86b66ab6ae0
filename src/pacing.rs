//! Variable-speed simulator.
//!
//! The simulator provisions its plant once, then emits one small batch per
//! cycle. The pause between cycles comes from a JSON pacing file that is
//! re-read every cycle, so editing it changes the rate of a running
//! simulator within one iteration.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::emitter::{emit_batch, SIMULATOR_TIMESTAMP_JITTER_MS};
use crate::provision::{
    default_catalog, ensure_plant, ensure_sensors, ProvisionError, Sensor, SensorSpec,
};

/// Delay used when the pacing file does not say otherwise.
pub const DEFAULT_DELAY_MS: u64 = 200;

/// Interval between progress reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

/// Contents of the pacing file.
///
/// ```json
/// { "delay_ms": 500, "random_jitter_ms": 250 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PacingConfig {
    /// Base pause between cycles
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound of the random extra pause
    #[serde(default, alias = "jitter_ms")]
    pub random_jitter_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
            random_jitter_ms: 0,
        }
    }
}

impl PacingConfig {
    /// Parse the pacing file contents.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read the pacing file. Never fails: a missing, unreadable or malformed
    /// file yields the defaults.
    pub async fn load(path: &Path) -> Self {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Pacing file unreadable, using defaults");
                return Self::default();
            }
        };

        match Self::parse(&text) {
            Ok(config) => config,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Pacing file malformed, using defaults");
                Self::default()
            }
        }
    }

    /// Pause for one cycle: `delay_ms` plus a uniform draw from
    /// `0..=random_jitter_ms`.
    pub fn next_delay(&self, rng: &mut impl Rng) -> Duration {
        let jitter = if self.random_jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=self.random_jitter_ms)
        };
        Duration::from_millis(self.delay_ms.saturating_add(jitter))
    }
}

/// What the simulator provisions and how much it sends per cycle.
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub plant_name: String,
    pub plant_type: String,
    pub pacing_file: PathBuf,
    /// Readings per sensor in each cycle's batch
    pub readings_per_sensor: usize,
    pub catalog: Vec<SensorSpec>,
}

impl SimulatorOptions {
    pub fn new(plant_name: impl Into<String>, pacing_file: impl Into<PathBuf>) -> Self {
        Self {
            plant_name: plant_name.into(),
            plant_type: crate::provision::DEFAULT_PLANT_TYPE.to_string(),
            pacing_file: pacing_file.into(),
            readings_per_sensor: 1,
            catalog: default_catalog(),
        }
    }
}

/// Counters kept while the simulator runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub iterations: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub readings_sent: u64,
}

/// Provision the plant, then emit a batch per cycle until `cancel` fires.
///
/// Cancellation during provisioning returns empty stats right away. Once
/// running, a batch already being sent is finished and counted before the
/// loop stops. Batch failures are logged and counted; only provisioning the
/// plant can end the run with an error.
pub async fn run_simulator(
    client: &ApiClient,
    options: &SimulatorOptions,
    cancel: CancellationToken,
) -> Result<SimulatorStats, ProvisionError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("simulator", run_id = %run_id, plant = %options.plant_name);

    simulate(client, options, cancel).instrument(span).await
}

async fn simulate(
    client: &ApiClient,
    options: &SimulatorOptions,
    cancel: CancellationToken,
) -> Result<SimulatorStats, ProvisionError> {
    let provisioned = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Cancelled before provisioning finished");
            return Ok(SimulatorStats::default());
        }
        provisioned = provision(client, options) => provisioned?,
    };
    let (plant_id, sensors) = provisioned;

    if sensors.is_empty() {
        warn!(plant_id = %plant_id, "No sensors provisioned, batches will be skipped");
    }

    info!(
        plant_id = %plant_id,
        sensors = sensors.len(),
        pacing_file = %options.pacing_file.display(),
        "Simulator started"
    );

    let mut stats = SimulatorStats::default();
    let mut last_report = Instant::now();
    let mut sent_since_report: u64 = 0;

    while !cancel.is_cancelled() {
        let pacing = PacingConfig::load(&options.pacing_file).await;
        let delay = pacing.next_delay(&mut rand::thread_rng());

        let outcome = emit_batch(
            client,
            &plant_id,
            &sensors,
            options.readings_per_sensor,
            SIMULATOR_TIMESTAMP_JITTER_MS,
        )
        .await;

        stats.iterations += 1;
        match outcome {
            Ok(sent) => {
                stats.batches_sent += 1;
                stats.readings_sent += sent as u64;
                sent_since_report += sent as u64;
            }
            Err(e) => {
                stats.batches_failed += 1;
                warn!(error = %e, iteration = stats.iterations, "Batch failed, continuing");
            }
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            info!(
                readings_sent = sent_since_report,
                rate = format!(
                    "{:.1}/s",
                    sent_since_report as f64 / last_report.elapsed().as_secs_f64()
                ),
                batches_failed = stats.batches_failed,
                delay_ms = delay.as_millis() as u64,
                "Simulator progress"
            );
            sent_since_report = 0;
            last_report = Instant::now();
        }

        debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next cycle");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(
        iterations = stats.iterations,
        batches_sent = stats.batches_sent,
        batches_failed = stats.batches_failed,
        readings_sent = stats.readings_sent,
        "Simulator stopped"
    );

    Ok(stats)
}

async fn provision(
    client: &ApiClient,
    options: &SimulatorOptions,
) -> Result<(String, Vec<Sensor>), ProvisionError> {
    let plant_id = ensure_plant(client, &options.plant_name, &options.plant_type).await?;
    let sensors = ensure_sensors(client, &plant_id, &options.catalog).await;
    Ok((plant_id, sensors))
}
