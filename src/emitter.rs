//! Batch assembly and submission.

use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, ClientError};
use crate::generator::{generate_value_with, Reading, ReadingBatch};
use crate::provision::Sensor;

/// Timestamp spread for fixed-load batches, in milliseconds.
pub const LOAD_TIMESTAMP_JITTER_MS: u64 = 1_000;

/// Timestamp spread for simulator batches, in milliseconds.
pub const SIMULATOR_TIMESTAMP_JITTER_MS: u64 = 800;

/// Why a batch was not accepted.
#[derive(Debug)]
pub enum EmitError {
    /// No sensor had a remote id, nothing was sent
    NoReadings,

    /// The API answered with something other than 200/201
    Rejected { status: StatusCode, message: String },

    /// The request itself failed (retries exhausted included)
    Client(ClientError),
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::NoReadings => write!(f, "No readings to send"),
            EmitError::Rejected { status, message } => {
                write!(f, "Batch rejected ({}): {}", status, message)
            }
            EmitError::Client(e) => write!(f, "Batch request failed: {}", e),
        }
    }
}

impl std::error::Error for EmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EmitError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for EmitError {
    fn from(err: ClientError) -> Self {
        EmitError::Client(err)
    }
}

/// Build `count` readings for every resolved sensor.
///
/// Readings are ordered repetition first, one per sensor in the given order.
/// Each timestamp is `base_ts` minus a random offset in `0..=jitter_ms`.
/// Sensors without a remote id are skipped.
pub fn build_readings(
    rng: &mut impl Rng,
    plant_id: &str,
    sensors: &[Sensor],
    count: usize,
    jitter_ms: u64,
    base_ts: i64,
) -> Vec<Reading> {
    let resolved: Vec<(&str, &Sensor)> = sensors
        .iter()
        .filter_map(|sensor| sensor.resolved_id().map(|id| (id, sensor)))
        .collect();

    if resolved.is_empty() {
        return Vec::new();
    }

    let mut readings = Vec::with_capacity(reading_capacity(count, resolved.len()));
    for _ in 0..count {
        for (sensor_id, sensor) in &resolved {
            let offset = rng.gen_range(0..=jitter_ms) as i64;
            readings.push(Reading {
                plant: plant_id.to_string(),
                sensor_id: sensor_id.to_string(),
                sensor_type: sensor.sensor_type.clone(),
                value: generate_value_with(rng, &sensor.sensor_type),
                timestamp: base_ts - offset,
            });
        }
    }

    readings
}

// Upfront allocation for one batch; larger batches grow as they are filled.
const MAX_PREALLOCATED_READINGS: usize = 10_000;

fn reading_capacity(count: usize, sensors: usize) -> usize {
    count.saturating_mul(sensors).min(MAX_PREALLOCATED_READINGS)
}

/// Generate a batch of `count` readings per sensor and submit it in one
/// request.
///
/// Returns the number of readings accepted. 200 and 201 are success;
/// anything else, including exhausted retries, is an error.
pub async fn emit_batch(
    client: &ApiClient,
    plant_id: &str,
    sensors: &[Sensor],
    count: usize,
    jitter_ms: u64,
) -> Result<usize, EmitError> {
    let base_ts = Utc::now().timestamp_millis();
    let readings = build_readings(
        &mut rand::thread_rng(),
        plant_id,
        sensors,
        count,
        jitter_ms,
        base_ts,
    );

    if readings.is_empty() {
        warn!(plant_id = plant_id, "No readings to send in batch");
        return Err(EmitError::NoReadings);
    }

    let batch = ReadingBatch::new(readings);
    let batch_size = batch.len();
    debug!(batch_size = batch_size, plant_id = plant_id, "Sending reading batch");

    let started = Instant::now();
    let response = client
        .post_json(&client.config().batch_url(), &batch)
        .await?;
    let elapsed = started.elapsed();
    let status = response.status();

    if status == StatusCode::OK || status == StatusCode::CREATED {
        info!(
            readings = batch_size,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch sent"
        );
        Ok(batch_size)
    } else {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(status = status.as_u16(), message = %message, "Batch rejected");
        Err(EmitError::Rejected { status, message })
    }
}
