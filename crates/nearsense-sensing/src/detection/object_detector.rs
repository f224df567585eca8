//! Person detection using a YOLOv8/YOLO11 ONNX model.
//!
//! Provides GPU acceleration when available:
//! - CUDA on Linux with NVIDIA GPU (`cuda` feature, `device = "cuda"`)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::{Arc, Mutex};

use image::DynamicImage;
use nearsense_models::{BoundingBox, Device, ModelConfig};
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use super::providers::{DetectorLoader, InferenceParams, ObjectDetector, RawDetection};
use super::tracker::IoUTracker;
use crate::error::{SensingError, SensingResult};
use crate::frame::Frame;

/// COCO class id of "person".
const PERSON_CLASS: usize = 0;
/// 4 box coordinates (cx, cy, w, h) + 80 COCO class scores.
const NUM_FEATURES: usize = 84;

/// YOLO person detector with IoU tracking.
pub struct YoloPersonDetector {
    session: Mutex<Session>,
    tracker: Mutex<IoUTracker>,
    input_size: u32,
}

impl YoloPersonDetector {
    /// Load the model described by `config`.
    ///
    /// Returns error if model file doesn't exist or cannot be loaded.
    pub fn new(config: &ModelConfig) -> SensingResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(SensingError::model_not_found(&config.model_path));
        }

        let session = create_session(model_path, config.device)?;
        info!(
            model_path = %config.model_path,
            input_size = config.imgsz,
            device = ?config.device,
            "Person detector initialized"
        );

        Ok(Self {
            session: Mutex::new(session),
            tracker: Mutex::new(IoUTracker::new(config.tracker_iou, config.tracker_max_gap)),
            input_size: config.imgsz,
        })
    }

    /// Preprocess a frame for YOLO inference.
    ///
    /// - Resize to the square model input
    /// - Normalize pixel values to [0, 1]
    /// - Convert to NCHW (batch, channels, height, width)
    fn preprocess(&self, frame: &Frame) -> SensingResult<Value> {
        let img = DynamicImage::ImageRgb8(frame.to_image()?);
        let size = self.input_size;
        let resized = img
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let (w, h) = (size as usize, size as usize);
        let mut chw_data: Vec<f32> = vec![0.0; 3 * h * w];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * w + x as usize;
            for c in 0..3 {
                chw_data[c * h * w + offset] = f32::from(pixel[c]) / 255.0;
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| SensingError::detection_failed(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> SensingResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| SensingError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| SensingError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // [1, 84, N]
        let output = outputs
            .get("output0")
            .ok_or_else(|| SensingError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| SensingError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl ObjectDetector for YoloPersonDetector {
    fn infer(&self, frame: &Frame, params: &InferenceParams) -> SensingResult<Vec<RawDetection>> {
        let input = self.preprocess(frame)?;
        let outputs = self.run_inference(input)?;
        let boxes = decode_person_boxes(
            &outputs,
            self.input_size,
            frame.width,
            frame.height,
            params,
        )?;

        let mut tracker = self
            .tracker
            .lock()
            .map_err(|_| SensingError::internal("Tracker lock poisoned"))?;
        let tracked = tracker.update(&boxes);

        debug!(count = tracked.len(), "Person detection completed");

        Ok(tracked
            .into_iter()
            .map(|(track_id, bbox, confidence)| RawDetection {
                bbox,
                confidence,
                track_id: Some(track_id),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "yolo"
    }
}

/// Decode raw YOLO output into person boxes in frame pixels, after NMS.
///
/// Output layout is `[84, N]`: rows 0-3 are cx, cy, w, h in model input
/// pixels, rows 4.. are per-class scores.
pub fn decode_person_boxes(
    outputs: &[f32],
    input_size: u32,
    frame_width: u32,
    frame_height: u32,
    params: &InferenceParams,
) -> SensingResult<Vec<(BoundingBox, f64)>> {
    if outputs.is_empty() || outputs.len() % NUM_FEATURES != 0 {
        return Err(SensingError::detection_failed(format!(
            "Unexpected output size {} (not a multiple of {})",
            outputs.len(),
            NUM_FEATURES
        )));
    }
    let num_boxes = outputs.len() / NUM_FEATURES;

    let output = ArrayView2::from_shape((NUM_FEATURES, num_boxes), outputs)
        .map_err(|e| SensingError::detection_failed(format!("Failed to reshape output: {}", e)))?;

    let scale_w = f64::from(frame_width) / f64::from(input_size);
    let scale_h = f64::from(frame_height) / f64::from(input_size);
    let max_x = f64::from(frame_width);
    let max_y = f64::from(frame_height);

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let score = output[[4 + PERSON_CLASS, i]];
        if score < params.conf {
            continue;
        }

        let cx = f64::from(output[[0, i]]);
        let cy = f64::from(output[[1, i]]);
        let w = f64::from(output[[2, i]]);
        let h = f64::from(output[[3, i]]);

        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_h).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_h).clamp(0.0, max_y),
        );
        if bbox.is_valid() {
            candidates.push((bbox, f64::from(score)));
        }
    }

    Ok(non_maximum_suppression(candidates, f64::from(params.iou)))
}

/// Drop boxes overlapping a higher-confidence box by more than `threshold`.
fn non_maximum_suppression(
    mut detections: Vec<(BoundingBox, f64)>,
    threshold: f64,
) -> Vec<(BoundingBox, f64)> {
    detections.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f64)> = Vec::new();
    for (bbox, score) in detections {
        if keep.iter().all(|(kept, _)| kept.iou(&bbox) <= threshold) {
            keep.push((bbox, score));
        }
    }
    keep
}

/// Create ONNX Runtime session with execution provider selection.
fn create_session(model_path: &Path, device: Device) -> SensingResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| SensingError::model_load(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| SensingError::model_load(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| SensingError::model_load(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if device == Device::Cuda {
            if let Ok(cuda_builder) = builder
                .clone()
                .with_execution_providers([CUDAExecutionProvider::default().build()])
            {
                if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                    info!("Using CUDA execution provider for person detection");
                    return Ok(session);
                }
            }
            debug!("CUDA execution provider not available, trying alternatives");
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "cuda")))]
    {
        if device == Device::Cuda {
            debug!("Built without CUDA support, falling back");
        }
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for person detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for person detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| SensingError::model_load(format!("Failed to load ONNX model: {}", e)))
}

/// Loader producing [`YoloPersonDetector`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct YoloLoader;

impl DetectorLoader for YoloLoader {
    fn load(&self, config: &ModelConfig) -> SensingResult<Arc<dyn ObjectDetector>> {
        Ok(Arc::new(YoloPersonDetector::new(config)?))
    }
}
