//! In-memory collaborators for pipeline and connection tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nearsense_models::{BoundingBox, CameraConfig, ModelConfig};

use crate::detection::{DetectorLoader, InferenceParams, ObjectDetector, RawDetection};
use crate::error::{SensingError, SensingResult};
use crate::frame::Frame;
use crate::source::{FrameSource, FrameSourceFactory};

const FRAME_SIZE: u32 = 32;

/// Produces solid frames every few milliseconds.
pub struct FakeSourceFactory {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    frame_limit: Option<u64>,
    read_failures: usize,
    fail_open: bool,
}

impl FakeSourceFactory {
    pub fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            frame_limit: None,
            read_failures: 0,
            fail_open: false,
        }
    }

    /// Stop yielding after `limit` frames (reads then block forever).
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Fail the first `count` reads of each source.
    pub fn with_read_failures(mut self, count: usize) -> Self {
        self.read_failures = count;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSourceFactory for FakeSourceFactory {
    async fn open(&self, _config: &CameraConfig) -> SensingResult<Box<dyn FrameSource>> {
        if self.fail_open {
            return Err(SensingError::source_unavailable("no camera attached"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            sequence: 0,
            limit: self.frame_limit,
            failures_left: self.read_failures,
            closed: self.closed.clone(),
        }))
    }
}

struct FakeSource {
    sequence: u64,
    limit: Option<u64>,
    failures_left: usize,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn read(&mut self) -> SensingResult<Frame> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;

        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SensingError::frame_read("device busy"));
        }

        self.sequence += 1;
        let len = (FRAME_SIZE * FRAME_SIZE * 3) as usize;
        Frame::new(FRAME_SIZE, FRAME_SIZE, vec![90; len], self.sequence)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reports one standing person, 340 px tall, with track id 1 (or nobody).
pub struct FakeDetector {
    calls: AtomicUsize,
    fail_next: AtomicUsize,
    empty_scene: bool,
}

impl FakeDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `count` inferences.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

impl ObjectDetector for FakeDetector {
    fn infer(&self, _frame: &Frame, _params: &InferenceParams) -> SensingResult<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(SensingError::detection_failed("inference glitch"));
        }
        if self.empty_scene {
            return Ok(Vec::new());
        }
        Ok(vec![RawDetection {
            bbox: BoundingBox::new(10.0, 10.0, 60.0, 350.0),
            confidence: 0.91234,
            track_id: Some(1),
        }])
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Hands out one shared [`FakeDetector`].
pub struct FakeLoader {
    detector: Arc<FakeDetector>,
    loads: AtomicUsize,
    attempts: AtomicUsize,
    fail: bool,
    fail_attempt: Option<usize>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            detector: Arc::new(FakeDetector {
                calls: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                empty_scene: false,
            }),
            loads: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            fail: false,
            fail_attempt: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Loader whose detector never sees anyone.
    pub fn empty_scene() -> Self {
        Self {
            detector: Arc::new(FakeDetector {
                calls: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                empty_scene: true,
            }),
            ..Self::new()
        }
    }

    /// Fail only the `attempt`-th load (1-based).
    pub fn failing_on(attempt: usize) -> Self {
        Self {
            fail_attempt: Some(attempt),
            ..Self::new()
        }
    }

    pub fn detector(&self) -> Arc<FakeDetector> {
        self.detector.clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DetectorLoader for FakeLoader {
    fn load(&self, _config: &ModelConfig) -> SensingResult<Arc<dyn ObjectDetector>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail || self.fail_attempt == Some(attempt) {
            return Err(SensingError::model_not_found("models/missing.onnx"));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.detector.clone())
    }
}
