//! API integration tests.
//!
//! The router runs against in-memory capture and detector backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use nearsense_api::{create_router, ApiConfig, AppState};
use nearsense_models::{BoundingBox, CameraConfig, ModelConfig, SensorConfig};
use nearsense_sensing::{
    ChannelConsumer, DetectorLoader, Frame, FrameSource, FrameSourceFactory, InferenceParams,
    ObjectDetector, RawDetection, SensingError, SensingResult,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestSource {
    sequence: u64,
}

#[async_trait]
impl FrameSource for TestSource {
    async fn read(&mut self) -> SensingResult<Frame> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.sequence += 1;
        Frame::new(32, 32, vec![128; 32 * 32 * 3], self.sequence)
    }

    async fn close(&mut self) {}
}

struct TestSources;

#[async_trait]
impl FrameSourceFactory for TestSources {
    async fn open(&self, _config: &CameraConfig) -> SensingResult<Box<dyn FrameSource>> {
        Ok(Box::new(TestSource { sequence: 0 }))
    }
}

/// One standing person 340 px tall: 400 cm with the default calibration.
struct TestDetector;

impl ObjectDetector for TestDetector {
    fn infer(&self, _frame: &Frame, _params: &InferenceParams) -> SensingResult<Vec<RawDetection>> {
        Ok(vec![RawDetection {
            bbox: BoundingBox::new(10.0, 10.0, 60.0, 350.0),
            confidence: 0.8,
            track_id: Some(1),
        }])
    }

    fn name(&self) -> &'static str {
        "test"
    }
}

struct TestLoader {
    available: bool,
}

impl DetectorLoader for TestLoader {
    fn load(&self, _config: &ModelConfig) -> SensingResult<Arc<dyn ObjectDetector>> {
        if self.available {
            Ok(Arc::new(TestDetector))
        } else {
            Err(SensingError::model_not_found("models/yolo11n.onnx"))
        }
    }
}

fn test_state(sensor_config_path: PathBuf) -> AppState {
    let config = ApiConfig {
        sensor_config_path,
        ..Default::default()
    };
    AppState::new(
        config,
        SensorConfig::default(),
        Arc::new(TestSources),
        Arc::new(TestLoader { available: true }),
    )
}

fn create_test_router() -> (Router, AppState) {
    let state = test_state(PathBuf::from("does/not/exist.json"));
    (create_router(state.clone(), None), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test root endpoint.
#[tokio::test]
async fn test_root_lists_endpoints() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoints"]["websocket_live"], "/ws/live");
}

/// Test health endpoint.
#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["detector_running"], false);
    assert_eq!(body["data"]["connections"], 0);
}

/// Test metrics endpoint is absent when metrics are disabled.
#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let (app, _) = create_test_router();
    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_current_distance_before_any_frame() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/api/distance/current")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_current_distance_after_streaming() {
    let (app, state) = create_test_router();

    let (consumer, mut frames) = ChannelConsumer::new(8);
    let id = state.connections.register(Arc::new(consumer)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();

    let (status, body) = send(&app, get("/api/distance/current")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["total_count"], 1);
    assert_eq!(body["data"]["closest_distance"], 400.0);
    assert_eq!(body["data"]["detections"][0]["bbox"], json!([10.0, 10.0, 60.0, 350.0]));

    let (_, stats) = send(&app, get("/api/detection/stats")).await;
    assert_eq!(stats["data"]["is_running"], true);
    assert_eq!(stats["data"]["total_count"], 1);

    state.connections.unregister(id).await;
    let (_, stats) = send(&app, get("/api/detection/stats")).await;
    assert_eq!(stats["data"]["is_running"], false);
}

#[tokio::test]
async fn test_detection_stats_when_idle() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/api/detection/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_running"], false);
    assert_eq!(body["data"]["uptime"], 0.0);
}

#[tokio::test]
async fn test_calibration() {
    let (app, state) = create_test_router();

    let (status, body) = send(
        &app,
        with_json(
            "POST",
            "/api/calibration",
            json!({"measurements": [[340.0, 400.0], [170.0, 800.0]]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["focal_length"], 800.0);
    assert_eq!(body["data"]["std_dev"], 0.0);
    assert_eq!(state.pipeline().config().distance.focal_length, 800.0);

    let (status, body) = send(
        &app,
        with_json("POST", "/api/calibration", json!({"measurements": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("measurements"));
}

#[tokio::test]
async fn test_recovery_config_round_trip() {
    let (app, state) = create_test_router();

    let (status, body) = send(&app, get("/api/distance-recovery-config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deactivation_delay_ms"], 1000);

    let update = json!({
        "enabled": true,
        "deactivation_delay_ms": 250,
        "recovery_duration_ms": 1500,
        "recovery_target_distance": 300.0
    });
    let (status, body) = send(&app, with_json("PUT", "/api/distance-recovery-config", update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recovery_duration_ms"], 1500);
    assert_eq!(state.recovery.read().await.deactivation_delay_ms, 250);

    let bad = json!({"recovery_target_distance": -1.0});
    let (status, _) = send(&app, with_json("PUT", "/api/distance-recovery-config", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.recovery.read().await.recovery_target_distance, 300.0);
}

#[tokio::test]
async fn test_refresh_with_missing_file_uses_defaults() {
    let (app, state) = create_test_router();

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/detector/refresh")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_running"], false);
    assert_eq!(*state.pipeline().config(), SensorConfig::default());
}

#[tokio::test]
async fn test_refresh_applies_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensor_config.json");
    let state = test_state(path.clone());
    let app = create_router(state.clone(), None);

    std::fs::write(&path, r#"{"distance": {"focal_length": 400.0}}"#).unwrap();
    let refresh = || {
        Request::builder()
            .method("POST")
            .uri("/api/detector/refresh")
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, refresh()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.pipeline().config().distance.focal_length, 400.0);

    std::fs::write(&path, r#"{"model": {"vid_stride": 0}}"#).unwrap();
    let (status, body) = send(&app, refresh()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
    assert_eq!(state.pipeline().config().distance.focal_length, 400.0);
}

#[tokio::test]
async fn test_startup_failure_is_not_fatal_to_api() {
    let state = AppState::new(
        ApiConfig::default(),
        SensorConfig::default(),
        Arc::new(TestSources),
        Arc::new(TestLoader { available: false }),
    );
    let app = create_router(state.clone(), None);

    let (consumer, _frames) = ChannelConsumer::new(8);
    let err = state.connections.register(Arc::new(consumer)).await.unwrap_err();
    assert!(err.is_startup());
    assert_eq!(state.connections.connection_count(), 0);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["detector_running"], false);
}

#[tokio::test]
async fn test_unknown_route() {
    let (app, _) = create_test_router();
    let (status, _) = send(&app, get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
