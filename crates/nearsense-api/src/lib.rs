//! Axum HTTP/WebSocket API server.
//!
//! This crate provides:
//! - Live distance, raw detection and adaptive preview WebSocket streams
//! - REST snapshot, stats, calibration and configuration endpoints
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{load_sensor_config, AppState};
