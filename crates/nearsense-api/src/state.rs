//! Application state.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use nearsense_models::{ModelsResult, RecoveryConfig, SensorConfig};
use nearsense_sensing::{
    ConnectionManager, DetectionPipeline, DetectorLoader, FfmpegSourceFactory,
    FrameSourceFactory, YoloLoader,
};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub connections: ConnectionManager,
    /// Recovery settings handed to new live sessions
    pub recovery: Arc<RwLock<RecoveryConfig>>,
    pub started_at: Instant,
}

impl AppState {
    /// Build state around explicit capture and detector backends.
    pub fn new(
        config: ApiConfig,
        sensor: SensorConfig,
        sources: Arc<dyn FrameSourceFactory>,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        let recovery = sensor.recovery.clone();
        let pipeline = DetectionPipeline::new(sensor, sources, loader);
        Self {
            config,
            connections: ConnectionManager::new(Arc::new(pipeline)),
            recovery: Arc::new(RwLock::new(recovery)),
            started_at: Instant::now(),
        }
    }

    /// Build state with the FFmpeg camera source and the ONNX detector.
    pub fn from_config(config: ApiConfig) -> ModelsResult<Self> {
        let sensor = load_sensor_config(&config.sensor_config_path)?;
        Ok(Self::new(
            config,
            sensor,
            Arc::new(FfmpegSourceFactory),
            Arc::new(YoloLoader),
        ))
    }

    pub fn pipeline(&self) -> &Arc<DetectionPipeline> {
        self.connections.pipeline()
    }
}

/// Read the sensor config file; a missing file yields the defaults.
pub fn load_sensor_config(path: &Path) -> ModelsResult<SensorConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Sensor config not found, using defaults");
        return Ok(SensorConfig::default());
    }
    SensorConfig::from_file(path)
}
