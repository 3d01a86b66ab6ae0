//! In-memory stand-in for the plant monitoring API, served through wiremock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::client::{ApiClient, RetryPolicy};
use crate::config::Config;

#[derive(Debug, Default)]
pub(crate) struct BackendState {
    pub plants: Vec<Value>,
    pub sensors: Vec<Value>,
    pub thresholds: Vec<(String, Value)>,
    pub batches: Vec<Vec<Value>>,
    pub calls: Vec<(String, String)>,
    /// Answer sensor creation with 400
    pub reject_sensors: bool,
    /// Answer threshold PUTs with 400
    pub reject_thresholds: bool,
    /// Answer batch POSTs with 400 once this many batches were accepted
    pub accept_batches: Option<usize>,
    next_id: u64,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Number of recorded calls with this method whose path ends with `suffix`.
    pub fn count(&self, method: &str, suffix: &str) -> usize {
        self.calls
            .iter()
            .filter(|(m, p)| m == method && p.ends_with(suffix))
            .count()
    }
}

/// Stateful fake backend: plants and sensors created through it show up in
/// later list calls.
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a mock server answering every request from this backend.
    pub async fn serve(&self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(self.clone())
            .mount(&server)
            .await;
        server
    }
}

fn data(status: u16, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "data": body }))
}

impl Respond for FakeBackend {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);

        let mut state = self.state();
        state.calls.push((method.clone(), path.clone()));

        let segments: Vec<&str> = path
            .trim_start_matches("/api/v1/")
            .split('/')
            .collect();

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["plants"]) => data(200, json!({ "items": state.plants.clone() })),
            ("POST", ["plants"]) => {
                let plant = json!({
                    "_id": state.next_id("plant"),
                    "name": body["name"],
                    "type": body["type"],
                });
                state.plants.push(plant.clone());
                data(201, plant)
            }
            ("GET", ["plants", plant_id, "sensors"]) => {
                let items: Vec<Value> = state
                    .sensors
                    .iter()
                    .filter(|s| s["plant"] == *plant_id)
                    .cloned()
                    .collect();
                data(200, json!({ "items": items }))
            }
            ("POST", ["plants", plant_id, "sensors"]) => {
                if state.reject_sensors {
                    return ResponseTemplate::new(400)
                        .set_body_json(json!({ "error": "sensor rejected" }));
                }
                let sensor = json!({
                    "_id": state.next_id("sensor"),
                    "plant": plant_id,
                    "type": body["type"],
                    "unit": body["unit"],
                });
                state.sensors.push(sensor.clone());
                data(201, sensor)
            }
            ("PUT", ["sensors", sensor_id, "threshold"]) => {
                if state.reject_thresholds {
                    return ResponseTemplate::new(400)
                        .set_body_json(json!({ "error": "threshold rejected" }));
                }
                state.thresholds.push((sensor_id.to_string(), body.clone()));
                data(200, body)
            }
            ("POST", ["readings", "batch"]) => {
                if let Some(limit) = state.accept_batches {
                    if state.batches.len() >= limit {
                        return ResponseTemplate::new(400)
                            .set_body_json(json!({ "error": "batch rejected" }));
                    }
                }
                let readings = body["readings"].as_array().cloned().unwrap_or_default();
                let inserted = readings.len();
                state.batches.push(readings);
                data(201, json!({ "inserted": inserted }))
            }
            _ => ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })),
        }
    }
}

/// Client against `server` with millisecond backoff.
pub(crate) fn fast_client(server: &MockServer) -> ApiClient {
    let config = Config::with_api_url(server.uri());
    let policy = RetryPolicy::new(3).with_backoff_unit(Duration::from_millis(1));
    ApiClient::with_policy(&config, policy).expect("client should build")
}
