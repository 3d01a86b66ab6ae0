//! Synthetic reading generation for plant sensors.
//!
//! This module provides the sensor categories known to the plant monitoring
//! API, the per-category value ranges used to produce plausible readings,
//! and the wire types for readings and reading batches.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Sensor categories accepted by the plant monitoring API.
///
/// Categories the simulator does not know are kept verbatim in
/// `SensorType::Other` so sensors listed by the backend survive a
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorType {
    Humidity,
    Ph,
    Temp,
    Lux,
    Other(String),
}

impl SensorType {
    /// Get all categories the simulator provisions.
    pub fn all() -> &'static [SensorType] {
        &[
            SensorType::Humidity,
            SensorType::Ph,
            SensorType::Temp,
            SensorType::Lux,
        ]
    }

    /// Get the category name as used on the wire.
    pub fn name(&self) -> &str {
        match self {
            SensorType::Humidity => "humidity",
            SensorType::Ph => "ph",
            SensorType::Temp => "temp",
            SensorType::Lux => "lux",
            SensorType::Other(name) => name,
        }
    }

    /// Closed interval plausible readings are drawn from.
    pub fn value_range(&self) -> (f64, f64) {
        match self {
            SensorType::Humidity => (20.0, 80.0),
            SensorType::Ph => (5.0, 7.5),
            SensorType::Temp => (15.0, 35.0),
            SensorType::Lux => (200.0, 2000.0),
            SensorType::Other(_) => (0.0, 100.0),
        }
    }
}

impl From<&str> for SensorType {
    fn from(value: &str) -> Self {
        match value {
            "humidity" => SensorType::Humidity,
            "ph" => SensorType::Ph,
            "temp" => SensorType::Temp,
            "lux" => SensorType::Lux,
            other => SensorType::Other(other.to_string()),
        }
    }
}

impl From<String> for SensorType {
    fn from(value: String) -> Self {
        SensorType::from(value.as_str())
    }
}

impl From<SensorType> for String {
    fn from(value: SensorType) -> Self {
        value.name().to_string()
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Generate a plausible reading value for a sensor category.
///
/// The value is drawn uniformly from the category's closed range and
/// rounded to two decimal places.
pub fn generate_value(sensor_type: &SensorType) -> f64 {
    generate_value_with(&mut rand::thread_rng(), sensor_type)
}

/// Same as [`generate_value`] with a caller supplied RNG.
pub fn generate_value_with(rng: &mut impl Rng, sensor_type: &SensorType) -> f64 {
    let (min, max) = sensor_type.value_range();
    round2(rng.gen_range(min..=max))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One timestamped measurement, matching the API's reading schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Id of the plant the sensor belongs to
    pub plant: String,

    /// Remote id of the sensor
    #[serde(rename = "sensorId")]
    pub sensor_id: String,

    /// Category of the sensor
    #[serde(rename = "sensorType")]
    pub sensor_type: SensorType,

    /// Measured value
    pub value: f64,

    /// Epoch milliseconds
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

/// Readings submitted together in one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadingBatch {
    pub readings: Vec<Reading>,
}

impl ReadingBatch {
    /// Create a new batch from a vector of readings.
    pub fn new(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    /// Get the number of readings in the batch.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
