//! Demand-driven detection pipeline.
//!
//! One run owns a frame source and a detector and executes a single loop
//! task: read, rotate, cache, (every Nth frame) detect, measure, publish.
//! Results go out on a broadcast channel that outlives individual runs, so
//! subscribers keep their receivers across restarts.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.

mod stats;

pub use stats::FrameStats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use nearsense_models::{
    round1, unix_timestamp, Detection, DetectionStats, ResultFrame, SensorConfig,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::detection::{DetectorLoader, InferenceParams, ObjectDetector, RawDetection};
use crate::distance::DistanceCalculator;
use crate::error::{SensingError, SensingResult};
use crate::frame::Frame;
use crate::metrics;
use crate::source::{FrameSource, FrameSourceFactory};

/// Capacity of the result broadcast channel.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Handle to the running loop task.
struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    started_at: Instant,
}

/// State shared between the pipeline and its loop task.
struct Shared {
    calculator: Mutex<DistanceCalculator>,
    current_frame: watch::Sender<Option<Arc<Frame>>>,
    snapshot: watch::Sender<Option<ResultFrame>>,
    results: broadcast::Sender<ResultFrame>,
}

impl Shared {
    fn calculator(&self) -> SensingResult<MutexGuard<'_, DistanceCalculator>> {
        self.calculator
            .lock()
            .map_err(|_| SensingError::internal("Distance calculator lock poisoned"))
    }
}

/// The detection pipeline.
pub struct DetectionPipeline {
    sources: Arc<dyn FrameSourceFactory>,
    loader: Arc<dyn DetectorLoader>,
    config: RwLock<Arc<SensorConfig>>,
    shared: Arc<Shared>,
    state: watch::Sender<PipelineState>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
    run_count: AtomicU64,
}

impl DetectionPipeline {
    pub fn new(
        config: SensorConfig,
        sources: Arc<dyn FrameSourceFactory>,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let shared = Shared {
            calculator: Mutex::new(DistanceCalculator::new(config.distance.clone())),
            current_frame: watch::Sender::new(None),
            snapshot: watch::Sender::new(None),
            results,
        };

        Self {
            sources,
            loader,
            config: RwLock::new(Arc::new(config)),
            shared: Arc::new(shared),
            state: watch::Sender::new(PipelineState::Stopped),
            run: tokio::sync::Mutex::new(None),
            run_count: AtomicU64::new(0),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<SensorConfig> {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_config(&self, config: SensorConfig) {
        let config = Arc::new(config);
        match self.config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Number of runs started since creation.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Subscribe to result frames. Receivers survive restarts.
    pub fn subscribe(&self) -> broadcast::Receiver<ResultFrame> {
        self.shared.results.subscribe()
    }

    /// Latest result frame, if any run has produced one.
    pub fn snapshot(&self) -> Option<ResultFrame> {
        self.shared.snapshot.borrow().clone()
    }

    /// Most recent (rotated) frame of the current run.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.shared.current_frame.borrow().clone()
    }

    /// Start a run. A no-op when already running.
    ///
    /// Loads the detector on the blocking pool and opens the frame source;
    /// either failing returns the pipeline to `Stopped`.
    pub async fn start(&self) -> SensingResult<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Ok(());
        }

        self.state.send_replace(PipelineState::Starting);
        let config = self.config();

        let detector = match self.load_detector(&config).await {
            Ok(detector) => detector,
            Err(e) => {
                self.state.send_replace(PipelineState::Stopped);
                error!(error = %e, "Detector failed to load");
                return Err(e);
            }
        };

        let source = match self.sources.open(&config.camera).await {
            Ok(source) => source,
            Err(e) => {
                self.state.send_replace(PipelineState::Stopped);
                error!(error = %e, "Frame source failed to open");
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            LoopContext {
                source,
                detector,
                config,
                shared: self.shared.clone(),
            },
            shutdown_rx,
        ));

        *run = Some(RunHandle {
            shutdown_tx,
            task,
            started_at: Instant::now(),
        });
        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(PipelineState::Running);
        metrics::set_pipeline_running(true);
        info!("Detection pipeline started");
        Ok(())
    }

    async fn load_detector(&self, config: &SensorConfig) -> SensingResult<Arc<dyn ObjectDetector>> {
        let loader = self.loader.clone();
        let model = config.model.clone();
        tokio::task::spawn_blocking(move || loader.load(&model))
            .await
            .map_err(|e| SensingError::model_load(format!("Detector load task failed: {}", e)))?
    }

    /// Stop the current run and wait for the loop to release its resources.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(handle) = run.take() else {
            return;
        };

        self.state.send_replace(PipelineState::Stopping);
        let _ = handle.shutdown_tx.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Detection loop ended abnormally");
        }

        self.shared.current_frame.send_replace(None);
        self.state.send_replace(PipelineState::Stopped);
        metrics::set_pipeline_running(false);
        info!("Detection pipeline stopped");
    }

    /// Swap in a new configuration, restarting the run if one was active.
    pub async fn reload(&self, config: SensorConfig) -> SensingResult<()> {
        config.validate()?;

        let was_running = self.run.lock().await.is_some();
        if was_running {
            self.stop().await;
        }

        {
            let mut calculator = self.shared.calculator()?;
            *calculator = DistanceCalculator::new(config.distance.clone());
        }
        self.set_config(config);
        info!(was_running, "Sensor configuration reloaded");

        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Calibrate the focal length from one measurement.
    pub fn calibrate(&self, box_height: f64, known_distance: f64) -> SensingResult<f64> {
        let focal = self
            .shared
            .calculator()?
            .calibrate_focal_length(box_height, known_distance)?;
        self.store_focal_length(focal);
        Ok(focal)
    }

    /// Calibrate the focal length from several measurements.
    pub fn calibrate_multi(&self, measurements: &[(f64, f64)]) -> SensingResult<(f64, f64)> {
        let (focal, std_dev) = self
            .shared
            .calculator()?
            .multi_point_calibration(measurements)?;
        self.store_focal_length(focal);
        Ok((focal, std_dev))
    }

    fn store_focal_length(&self, focal: f64) {
        let mut config = (*self.config()).clone();
        config.distance.focal_length = focal;
        self.set_config(config);
    }

    /// Statistics of the latest result and the current run.
    pub async fn stats(&self) -> DetectionStats {
        let uptime = self
            .run
            .lock()
            .await
            .as_ref()
            .map(|h| round1(h.started_at.elapsed().as_secs_f64()))
            .unwrap_or(0.0);

        let snapshot = self.snapshot();
        DetectionStats {
            total_count: snapshot.as_ref().map(|s| s.total_count).unwrap_or(0),
            closest_distance: snapshot.as_ref().map(|s| s.closest_distance).unwrap_or(0.0),
            fps: snapshot.as_ref().map(|s| s.fps).unwrap_or(0),
            actual_fps: snapshot.as_ref().map(|s| s.actual_fps).unwrap_or(0),
            is_running: self.is_running(),
            uptime,
        }
    }
}

/// Everything one run of the loop owns.
struct LoopContext {
    source: Box<dyn FrameSource>,
    detector: Arc<dyn ObjectDetector>,
    config: Arc<SensorConfig>,
    shared: Arc<Shared>,
}

/// Outcome of one loop iteration.
enum Step {
    Skipped,
    Published,
    Shutdown,
}

async fn run_loop(ctx: LoopContext, mut shutdown: watch::Receiver<bool>) {
    let LoopContext {
        mut source,
        detector,
        config,
        shared,
    } = ctx;

    let perf = &config.performance;
    let read_backoff = Duration::from_millis(perf.read_failure_backoff_ms);
    let error_backoff = Duration::from_millis(perf.error_backoff_ms);
    let frame_interval = if perf.use_fps_limit && perf.target_fps > 0 {
        Some(Duration::from_secs_f64(1.0 / f64::from(perf.target_fps)))
    } else {
        None
    };

    let mut stats = FrameStats::new(perf.stats_window, Instant::now());
    let mut frame_count: u64 = 0;

    debug!(detector = detector.name(), "Detection loop running");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let loop_start = Instant::now();

        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = source.read() => read,
        };

        let frame = match read {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Frame read failed, retrying");
                metrics::record_read_failure();
                if sleep_or_shutdown(&mut shutdown, read_backoff).await {
                    break;
                }
                continue;
            }
        };
        metrics::record_frame_read();
        frame_count += 1;

        let step = process_frame(
            frame,
            frame_count,
            &detector,
            &config,
            &shared,
            &mut stats,
            &mut shutdown,
        )
        .await;

        match step {
            Ok(Step::Shutdown) => break,
            Ok(Step::Skipped) => {
                tokio::task::yield_now().await;
            }
            Ok(Step::Published) => {
                if let Some(interval) = frame_interval {
                    let elapsed = loop_start.elapsed();
                    if interval > elapsed && sleep_or_shutdown(&mut shutdown, interval - elapsed).await
                    {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Detection loop error");
                if sleep_or_shutdown(&mut shutdown, error_backoff).await {
                    break;
                }
            }
        }
    }

    source.close().await;
    drop(detector);
    debug!(frames = frame_count, "Detection loop exited");
}

/// Steps 2-7 of one iteration: rotate, cache, stride, detect, measure, publish.
async fn process_frame(
    frame: Frame,
    frame_count: u64,
    detector: &Arc<dyn ObjectDetector>,
    config: &SensorConfig,
    shared: &Shared,
    stats: &mut FrameStats,
    shutdown: &mut watch::Receiver<bool>,
) -> SensingResult<Step> {
    let frame = Arc::new(frame.rotate(config.camera.rotation)?);
    shared.current_frame.send_replace(Some(frame.clone()));

    let stride = u64::from(config.model.vid_stride.max(1));
    if frame_count % stride != 0 {
        return Ok(Step::Skipped);
    }

    let params = InferenceParams::from(&config.model);
    let job = {
        let detector = detector.clone();
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || detector.infer(&frame, &params))
    };

    let started = Instant::now();
    let joined = tokio::select! {
        _ = shutdown.changed() => return Ok(Step::Shutdown),
        joined = job => joined,
    };
    let raw = match joined {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            metrics::record_detector_failure();
            return Err(e);
        }
        Err(e) => {
            metrics::record_detector_failure();
            return Err(SensingError::detection_failed(format!("Inference task failed: {}", e)));
        }
    };
    metrics::record_detection(started.elapsed().as_secs_f64(), raw.len());

    let now = Instant::now();
    let detections = {
        let mut calculator = shared.calculator()?;
        let detections: Vec<Detection> = raw
            .into_iter()
            .map(|d| measure(&mut calculator, d, now))
            .collect();
        let evicted = calculator.evict_stale(now);
        if evicted > 0 {
            debug!(evicted, "Dropped stale track state");
        }
        detections
    };

    let (fps, actual_fps) = stats.record(Instant::now());
    let mut result = ResultFrame::from_detections(detections, unix_timestamp());
    result.fps = fps;
    result.actual_fps = actual_fps;

    shared.snapshot.send_replace(Some(result.clone()));
    // No subscribers is fine
    let _ = shared.results.send(result);

    Ok(Step::Published)
}

fn measure(calculator: &mut DistanceCalculator, raw: RawDetection, now: Instant) -> Detection {
    let distance = calculator.calculate_distance_at(
        raw.bbox.height(),
        raw.bbox.width(),
        raw.track_id,
        now,
    );
    Detection {
        track_id: raw.track_id,
        distance: round1(distance.max(0.0)),
        bbox: raw.bbox,
        confidence: (raw.confidence * 1000.0).round() / 1000.0,
    }
}

/// Sleep for `duration`; returns true if shutdown was signalled first.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
