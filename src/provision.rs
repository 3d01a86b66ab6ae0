//! Idempotent provisioning of the plant and its sensors.
//!
//! Plants are matched by name and sensors by type; anything already present
//! on the backend is reused, anything missing is created. A freshly created
//! sensor gets its threshold set right after creation.

use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{read_data, ApiClient, ClientError};
use crate::generator::SensorType;

/// Plant type used when none is given.
pub const DEFAULT_PLANT_TYPE: &str = "hidroponico";

/// A monitored plant as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub plant_type: Option<String>,
}

/// Acceptable range configured for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub min: f64,
    pub max: f64,
}

/// A sensor attached to a plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub sensor_type: SensorType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Threshold confirmed by this run. `None` for reused sensors and for
    /// sensors whose threshold could not be set.
    #[serde(skip)]
    pub threshold: Option<Threshold>,
}

impl Sensor {
    /// Remote id, if the sensor has been resolved.
    pub fn resolved_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// One entry of the sensor catalog provisioned for every plant.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub sensor_type: SensorType,
    pub unit: String,
    pub threshold: Threshold,
}

impl SensorSpec {
    pub fn new(sensor_type: SensorType, unit: &str, min: f64, max: f64) -> Self {
        Self {
            sensor_type,
            unit: unit.to_string(),
            threshold: Threshold { min, max },
        }
    }
}

/// The fixed catalog: humidity, pH, temperature and light, in that order.
pub fn default_catalog() -> Vec<SensorSpec> {
    vec![
        SensorSpec::new(SensorType::Humidity, "%", 30.0, 70.0),
        SensorSpec::new(SensorType::Ph, "pH", 5.5, 7.0),
        SensorSpec::new(SensorType::Temp, "°C", 18.0, 30.0),
        SensorSpec::new(SensorType::Lux, "lx", 300.0, 1500.0),
    ]
}

/// Errors that stop provisioning.
#[derive(Debug)]
pub enum ProvisionError {
    /// The create call failed or answered with an unexpected status
    Request {
        resource: &'static str,
        source: ClientError,
    },

    /// The create call succeeded but the body carried no id
    MissingId { resource: &'static str },
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionError::Request { resource, source } => {
                write!(f, "Could not create {}: {}", resource, source)
            }
            ProvisionError::MissingId { resource } => {
                write!(f, "Created {} has no id", resource)
            }
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProvisionError::Request { source, .. } => Some(source),
            ProvisionError::MissingId { .. } => None,
        }
    }
}

/// Outcome of [`get_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned<T> {
    Existing(T),
    Created(T),
}

impl<T> Provisioned<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Provisioned::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Provisioned::Existing(item) | Provisioned::Created(item) => item,
        }
    }
}

/// Reuse the first item of `existing` accepted by `matches`, otherwise run
/// `create`.
///
/// `create` is only awaited when nothing matched, so the call is idempotent
/// as long as the backend lists what it created.
pub async fn get_or_create<T, P, F, Fut, E>(
    existing: &[T],
    mut matches: P,
    create: F,
) -> Result<Provisioned<T>, E>
where
    T: Clone,
    P: FnMut(&T) -> bool,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(found) = existing.iter().find(|item| matches(item)) {
        return Ok(Provisioned::Existing(found.clone()));
    }

    create().await.map(Provisioned::Created)
}

#[derive(Serialize)]
struct NewPlant<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    plant_type: &'a str,
}

#[derive(Serialize)]
struct NewSensor<'a> {
    #[serde(rename = "type")]
    sensor_type: &'a SensorType,
    unit: &'a str,
}

/// Return the id of the plant called `name`, creating it if needed.
///
/// # Errors
///
/// Returns `ProvisionError` when the plant has to be created and the create
/// call does not answer 201 with an id (retries exhausted included).
pub async fn ensure_plant(
    client: &ApiClient,
    name: &str,
    plant_type: &str,
) -> Result<String, ProvisionError> {
    let plants: Vec<Plant> = client.fetch_list(&client.config().plants_url()).await;

    let plant = get_or_create(
        &plants,
        |plant| plant.name == name && plant.id.is_some(),
        || create_plant(client, name, plant_type),
    )
    .await?;

    let created = plant.was_created();
    let id = plant
        .into_inner()
        .id
        .ok_or(ProvisionError::MissingId { resource: "plant" })?;

    if created {
        info!(plant = name, plant_id = %id, "Plant created");
    } else {
        info!(plant = name, plant_id = %id, "Plant found");
    }

    Ok(id)
}

async fn create_plant(
    client: &ApiClient,
    name: &str,
    plant_type: &str,
) -> Result<Plant, ProvisionError> {
    let url = client.config().plants_url();
    let request_error = |source| ProvisionError::Request {
        resource: "plant",
        source,
    };

    let response = client
        .post_json(&url, &NewPlant { name, plant_type })
        .await
        .map_err(request_error)?;
    let plant: Plant = read_data(response, &[StatusCode::CREATED])
        .await
        .map_err(request_error)?;

    if plant.id.is_none() {
        return Err(ProvisionError::MissingId { resource: "plant" });
    }

    Ok(plant)
}

/// Make sure every catalog sensor exists on the plant.
///
/// Sensors already present are returned as listed, without touching their
/// threshold. Missing ones are created and then get the catalog threshold;
/// a threshold failure is logged and the sensor is kept. A sensor that
/// cannot be created is logged and left out of the result.
pub async fn ensure_sensors(
    client: &ApiClient,
    plant_id: &str,
    catalog: &[SensorSpec],
) -> Vec<Sensor> {
    let existing: Vec<Sensor> = client
        .fetch_list(&client.config().plant_sensors_url(plant_id))
        .await;

    let mut sensors = Vec::with_capacity(catalog.len());

    for spec in catalog {
        let outcome = get_or_create(
            &existing,
            |sensor| sensor.sensor_type == spec.sensor_type && sensor.resolved_id().is_some(),
            || create_sensor(client, plant_id, spec),
        )
        .await;

        match outcome {
            Ok(Provisioned::Existing(sensor)) => {
                info!(
                    sensor_type = %spec.sensor_type,
                    sensor_id = sensor.resolved_id().unwrap_or_default(),
                    "Sensor found"
                );
                sensors.push(sensor);
            }
            Ok(Provisioned::Created(mut sensor)) => {
                let sensor_id = sensor.resolved_id().unwrap_or_default().to_string();
                info!(sensor_type = %spec.sensor_type, sensor_id = %sensor_id, "Sensor created");

                match set_threshold(client, &sensor_id, spec.threshold).await {
                    Ok(status) => {
                        info!(
                            sensor_id = %sensor_id,
                            status = status.as_u16(),
                            min = spec.threshold.min,
                            max = spec.threshold.max,
                            "Threshold set"
                        );
                        sensor.threshold = Some(spec.threshold);
                    }
                    Err(e) => {
                        warn!(
                            sensor_type = %spec.sensor_type,
                            sensor_id = %sensor_id,
                            error = %e,
                            "Could not set threshold, keeping sensor without it"
                        );
                    }
                }

                sensors.push(sensor);
            }
            Err(e) => {
                warn!(sensor_type = %spec.sensor_type, error = %e, "Could not create sensor");
            }
        }
    }

    sensors
}

async fn create_sensor(
    client: &ApiClient,
    plant_id: &str,
    spec: &SensorSpec,
) -> Result<Sensor, ProvisionError> {
    let url = client.config().plant_sensors_url(plant_id);
    let request_error = |source| ProvisionError::Request {
        resource: "sensor",
        source,
    };

    let body = NewSensor {
        sensor_type: &spec.sensor_type,
        unit: &spec.unit,
    };
    let response = client.post_json(&url, &body).await.map_err(request_error)?;
    let sensor: Sensor = read_data(response, &[]).await.map_err(request_error)?;

    if sensor.resolved_id().is_none() {
        return Err(ProvisionError::MissingId { resource: "sensor" });
    }

    Ok(sensor)
}

async fn set_threshold(
    client: &ApiClient,
    sensor_id: &str,
    threshold: Threshold,
) -> Result<StatusCode, ClientError> {
    let url = client.config().threshold_url(sensor_id);
    let response = client.put_json(&url, &threshold).await?;
    let status = response.status();

    if status == StatusCode::OK || status == StatusCode::CREATED {
        Ok(status)
    } else {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::Status {
            code: status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_client, FakeBackend};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_default_catalog() {
        let catalog = default_catalog();
        let types: Vec<&str> = catalog.iter().map(|s| s.sensor_type.name()).collect();
        assert_eq!(types, vec!["humidity", "ph", "temp", "lux"]);
        assert_eq!(catalog[1].unit, "pH");
        assert_eq!(catalog[3].threshold, Threshold { min: 300.0, max: 1500.0 });
    }

    #[test]
    fn test_sensor_deserialization() {
        let sensor: Sensor = serde_json::from_value(json!({
            "_id": "65a1", "plant": "p1", "type": "temp", "unit": "°C"
        }))
        .unwrap();
        assert_eq!(sensor.resolved_id(), Some("65a1"));
        assert_eq!(sensor.sensor_type, SensorType::Temp);
        assert!(sensor.threshold.is_none());

        let unresolved: Sensor = serde_json::from_value(json!({ "type": "lux" })).unwrap();
        assert_eq!(unresolved.resolved_id(), None);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_match() {
        let existing = vec!["a".to_string(), "b".to_string()];
        let mut creates = 0;
        let outcome: Result<_, ()> = get_or_create(
            &existing,
            |item| item == "b",
            || {
                creates += 1;
                async { Ok("c".to_string()) }
            },
        )
        .await;
        assert_eq!(outcome, Ok(Provisioned::Existing("b".to_string())));
        assert_eq!(creates, 0);
    }

    #[tokio::test]
    async fn test_get_or_create_creates_missing() {
        let existing: Vec<String> = vec![];
        let outcome: Result<_, ()> =
            get_or_create(&existing, |_| true, || async { Ok("new".to_string()) }).await;
        let outcome = outcome.unwrap();
        assert!(outcome.was_created());
        assert_eq!(outcome.into_inner(), "new");
    }

    #[tokio::test]
    async fn test_ensure_plant_is_idempotent() {
        let backend = FakeBackend::default();
        let server = backend.serve().await;
        let client = fast_client(&server);

        let first = ensure_plant(&client, "Planta de Carga", DEFAULT_PLANT_TYPE)
            .await
            .unwrap();
        let second = ensure_plant(&client, "Planta de Carga", DEFAULT_PLANT_TYPE)
            .await
            .unwrap();

        assert_eq!(first, second);
        let state = backend.state();
        assert_eq!(state.count("POST", "/api/v1/plants"), 1);
        assert_eq!(state.plants[0]["type"], "hidroponico");
    }

    #[tokio::test]
    async fn test_ensure_plant_matches_exact_name() {
        let backend = FakeBackend::default();
        backend.state().plants.push(json!({ "_id": "old", "name": "Planta de carga" }));
        let server = backend.serve().await;
        let client = fast_client(&server);

        let id = ensure_plant(&client, "Planta de Carga", "hidroponico")
            .await
            .unwrap();

        assert_ne!(id, "old");
        assert_eq!(backend.state().count("POST", "/api/v1/plants"), 1);
    }

    #[tokio::test]
    async fn test_ensure_plant_fails_when_create_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/plants"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "items": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/plants"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client(&server);
        let err = ensure_plant(&client, "Invernadero", "hidroponico")
            .await
            .unwrap_err();

        match err {
            ProvisionError::Request { resource, source } => {
                assert_eq!(resource, "plant");
                assert!(source.is_exhausted());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_plant_requires_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/plants"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/plants"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": { "name": "Invernadero" }
            })))
            .mount(&server)
            .await;

        let client = fast_client(&server);
        let err = ensure_plant(&client, "Invernadero", "hidroponico")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingId { resource: "plant" }));
    }

    #[tokio::test]
    async fn test_ensure_sensors_on_empty_backend() {
        let backend = FakeBackend::default();
        let server = backend.serve().await;
        let client = fast_client(&server);

        let sensors = ensure_sensors(&client, "plant-1", &default_catalog()).await;

        assert_eq!(sensors.len(), 4);
        assert!(sensors.iter().all(|s| s.resolved_id().is_some()));
        assert!(sensors.iter().all(|s| s.threshold.is_some()));

        let state = backend.state();
        assert_eq!(state.count("POST", "/sensors"), 4);
        assert_eq!(state.count("PUT", "/threshold"), 4);
        assert_eq!(state.thresholds[0].1, json!({ "min": 30.0, "max": 70.0 }));
    }

    #[tokio::test]
    async fn test_ensure_sensors_reuses_existing_type() {
        let backend = FakeBackend::default();
        backend.state().sensors.push(json!({
            "_id": "hum-1", "plant": "plant-1", "type": "humidity", "unit": "%"
        }));
        let server = backend.serve().await;
        let client = fast_client(&server);

        let sensors = ensure_sensors(&client, "plant-1", &default_catalog()).await;

        assert_eq!(sensors.len(), 4);
        assert_eq!(sensors[0].resolved_id(), Some("hum-1"));
        assert!(sensors[0].threshold.is_none());

        let state = backend.state();
        assert_eq!(state.count("POST", "/sensors"), 3);
        assert_eq!(state.count("PUT", "/threshold"), 3);
        assert!(state.thresholds.iter().all(|(id, _)| id != "hum-1"));
    }

    #[tokio::test]
    async fn test_threshold_failure_keeps_sensor() {
        let backend = FakeBackend::default();
        backend.state().reject_thresholds = true;
        let server = backend.serve().await;
        let client = fast_client(&server);

        let sensors = ensure_sensors(&client, "plant-1", &default_catalog()).await;

        assert_eq!(sensors.len(), 4);
        assert!(sensors.iter().all(|s| s.threshold.is_none()));
        // 400 is not retried
        assert_eq!(backend.state().count("PUT", "/threshold"), 4);
    }

    #[tokio::test]
    async fn test_sensor_without_id_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/plants/p1/sensors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "items": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/plants/p1/sensors"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid sensor"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(&server);
        let catalog = vec![SensorSpec::new(SensorType::Ph, "pH", 5.5, 7.0)];
        let sensors = ensure_sensors(&client, "p1", &catalog).await;

        assert!(sensors.is_empty());
    }
}
