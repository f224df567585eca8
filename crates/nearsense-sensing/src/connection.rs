//! Consumer registry and result fan-out.
//!
//! The pipeline runs only while at least one consumer is registered: the
//! first registration starts it, the last unregistration stops it. One
//! fan-out task forwards every result frame to all consumers; a consumer
//! that reports itself closed is dropped, a full one just misses the frame.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use nearsense_models::{ResultFrame, SensorConfig};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SensingResult;
use crate::metrics;
use crate::pipeline::DetectionPipeline;

/// Opaque identity of a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a frame could not be handed to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The consumer is gone and should be unregistered.
    #[error("consumer closed")]
    Closed,
    /// The consumer is alive but behind; this frame is skipped.
    #[error("consumer queue full")]
    Full,
}

/// Something that receives result frames.
///
/// `deliver` must not block; the fan-out calls it inline for every frame.
pub trait Consumer: Send + Sync {
    fn deliver(&self, frame: &ResultFrame) -> Result<(), DeliveryError>;
}

/// Consumer backed by a bounded mpsc queue.
pub struct ChannelConsumer {
    tx: mpsc::Sender<ResultFrame>,
}

impl ChannelConsumer {
    /// Create a consumer and the receiver its frames land on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ResultFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl Consumer for ChannelConsumer {
    fn deliver(&self, frame: &ResultFrame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

struct ManagerInner {
    pipeline: Arc<DetectionPipeline>,
    consumers: RwLock<HashMap<ConsumerId, Arc<dyn Consumer>>>,
    /// Serializes start/stop decisions and holds the fan-out task.
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerInner {
    fn consumers(&self) -> RwLockReadGuard<'_, HashMap<ConsumerId, Arc<dyn Consumer>>> {
        self.consumers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn consumers_mut(&self) -> RwLockWriteGuard<'_, HashMap<ConsumerId, Arc<dyn Consumer>>> {
        self.consumers.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the consumer set and drives the pipeline lifecycle from it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(pipeline: Arc<DetectionPipeline>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                pipeline,
                consumers: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    pub fn pipeline(&self) -> &Arc<DetectionPipeline> {
        &self.inner.pipeline
    }

    pub fn connection_count(&self) -> usize {
        self.inner.consumers().len()
    }

    /// Whether the fan-out task is alive.
    pub async fn is_fanout_active(&self) -> bool {
        self.inner
            .lifecycle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Register a consumer, starting the pipeline if it is not running.
    ///
    /// When the pipeline cannot start, every consumer is dropped (their
    /// receivers close) and the startup error is returned.
    pub async fn register(&self, consumer: Arc<dyn Consumer>) -> SensingResult<ConsumerId> {
        let id = ConsumerId::new();
        let mut fanout = self.inner.lifecycle.lock().await;

        let count = {
            let mut consumers = self.inner.consumers_mut();
            consumers.insert(id, consumer);
            consumers.len()
        };
        metrics::set_active_consumers(count);

        let fanout_live = fanout.as_ref().is_some_and(|handle| !handle.is_finished());
        let needs_start = !self.inner.pipeline.is_running() || !fanout_live;
        if needs_start {
            if let Some(stale) = fanout.take() {
                stale.abort();
            }
            // Subscribe first so the first frame of the run is not missed
            let results = self.inner.pipeline.subscribe();
            if let Err(e) = self.inner.pipeline.start().await {
                warn!(consumer = %id, error = %e, "Pipeline failed to start for new consumer");
                self.abandon_run();
                return Err(e);
            }
            *fanout = Some(tokio::spawn(fanout_loop(
                Arc::downgrade(&self.inner),
                results,
            )));
            info!("Result fan-out started");
        }

        info!(consumer = %id, connections = count, "Consumer registered");
        Ok(id)
    }

    /// Remove a consumer, stopping the pipeline if it was the last.
    ///
    /// Returns false when the id was not registered.
    pub async fn unregister(&self, id: ConsumerId) -> bool {
        let (removed, remaining) = {
            let mut consumers = self.inner.consumers_mut();
            let removed = consumers.remove(&id).is_some();
            (removed, consumers.len())
        };
        if !removed {
            return false;
        }
        metrics::set_active_consumers(remaining);
        info!(consumer = %id, connections = remaining, "Consumer unregistered");

        if remaining == 0 {
            self.shutdown_if_idle().await;
        }
        true
    }

    /// Drop every consumer and stop the pipeline.
    pub async fn disconnect_all(&self) {
        let dropped = {
            let mut consumers = self.inner.consumers_mut();
            let dropped = consumers.len();
            consumers.clear();
            dropped
        };
        metrics::set_active_consumers(0);
        if dropped > 0 {
            info!(dropped, "Disconnected all consumers");
        }
        self.shutdown_if_idle().await;
    }

    /// Stop the pipeline and the fan-out unless someone registered meanwhile.
    async fn shutdown_if_idle(&self) {
        let mut fanout = self.inner.lifecycle.lock().await;
        if self.connection_count() > 0 {
            return;
        }

        self.inner.pipeline.stop().await;
        if let Some(handle) = fanout.take() {
            handle.abort();
            info!("Result fan-out stopped");
        }
    }

    /// Apply a new sensor configuration, restarting an active run.
    ///
    /// If the restart fails, the consumers of the old run are dropped so
    /// that the pipeline never sits stopped under registered consumers.
    pub async fn reload(&self, config: SensorConfig) -> SensingResult<()> {
        let mut fanout = self.inner.lifecycle.lock().await;
        let result = self.inner.pipeline.reload(config).await;
        if let Err(e) = &result {
            if !self.inner.pipeline.is_running() && self.connection_count() > 0 {
                warn!(error = %e, "Pipeline did not restart after reload");
                self.abandon_run();
                if let Some(handle) = fanout.take() {
                    handle.abort();
                    info!("Result fan-out stopped");
                }
            }
        }
        result
    }

    /// Drop every consumer after a failed start. Caller holds the lifecycle lock.
    fn abandon_run(&self) {
        let dropped = {
            let mut consumers = self.inner.consumers_mut();
            let dropped = consumers.len();
            consumers.clear();
            dropped
        };
        metrics::set_active_consumers(0);
        if dropped > 1 {
            warn!(dropped, "Dropped consumers of a stopped pipeline");
        }
    }

    /// Deliver `frame` to every consumer, dropping the closed ones.
    pub async fn broadcast(&self, frame: &ResultFrame) {
        let targets: Vec<(ConsumerId, Arc<dyn Consumer>)> = self
            .inner
            .consumers()
            .iter()
            .map(|(id, consumer)| (*id, consumer.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, consumer) in targets {
            match consumer.deliver(frame) {
                Ok(()) => {}
                Err(DeliveryError::Full) => {
                    debug!(consumer = %id, "Consumer behind, frame skipped");
                }
                Err(DeliveryError::Closed) => closed.push(id),
            }
        }

        for id in closed {
            if self.unregister(id).await {
                metrics::record_consumer_dropped();
            }
        }
    }
}

async fn fanout_loop(inner: Weak<ManagerInner>, mut results: broadcast::Receiver<ResultFrame>) {
    loop {
        let frame = match results.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Fan-out lagged behind the pipeline");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        ConnectionManager { inner }.broadcast(&frame).await;
    }
    debug!("Fan-out loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineState;
    use crate::test_support::{FakeLoader, FakeSourceFactory};
    use std::time::Duration;
    use tokio::time::timeout;

    fn manager_with(loader: FakeLoader) -> (ConnectionManager, Arc<FakeSourceFactory>) {
        let mut config = SensorConfig::default();
        config.performance.error_backoff_ms = 10;
        let sources = Arc::new(FakeSourceFactory::new());
        let pipeline = DetectionPipeline::new(config, sources.clone(), Arc::new(loader));
        (ConnectionManager::new(Arc::new(pipeline)), sources)
    }

    fn manager() -> (ConnectionManager, Arc<FakeSourceFactory>) {
        manager_with(FakeLoader::new())
    }

    async fn next(rx: &mut mpsc::Receiver<ResultFrame>) -> ResultFrame {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no frame in time")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_first_consumer_starts_last_stops() {
        let (manager, sources) = manager();
        let (consumer, mut rx) = ChannelConsumer::new(8);

        let id = manager.register(Arc::new(consumer)).await.unwrap();
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.pipeline().is_running());
        assert!(manager.is_fanout_active().await);

        let frame = next(&mut rx).await;
        assert_eq!(frame.total_count, 1);

        assert!(manager.unregister(id).await);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.pipeline().state(), PipelineState::Stopped);
        assert!(!manager.is_fanout_active().await);
        assert_eq!(sources.closed(), 1);

        assert!(!manager.unregister(id).await);
    }

    #[tokio::test]
    async fn test_second_consumer_shares_the_run() {
        let (manager, _) = manager();
        let (a, mut rx_a) = ChannelConsumer::new(8);
        let (b, mut rx_b) = ChannelConsumer::new(8);

        let id_a = manager.register(Arc::new(a)).await.unwrap();
        manager.register(Arc::new(b)).await.unwrap();
        assert_eq!(manager.pipeline().run_count(), 1);

        next(&mut rx_a).await;
        next(&mut rx_b).await;

        manager.unregister(id_a).await;
        assert!(manager.pipeline().is_running());
        next(&mut rx_b).await;

        manager.disconnect_all().await;
        assert!(!manager.pipeline().is_running());
    }

    #[tokio::test]
    async fn test_closed_consumer_is_dropped() {
        let (manager, _) = manager();
        let (gone, rx_gone) = ChannelConsumer::new(8);
        let (alive, mut rx_alive) = ChannelConsumer::new(8);

        manager.register(Arc::new(gone)).await.unwrap();
        manager.register(Arc::new(alive)).await.unwrap();
        drop(rx_gone);

        // after the second frame the first broadcast has visited everyone
        next(&mut rx_alive).await;
        next(&mut rx_alive).await;
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.pipeline().is_running());

        manager.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_full_consumer_is_kept() {
        let (manager, _) = manager();
        let (slow, _rx_slow) = ChannelConsumer::new(1);
        let (fast, mut rx_fast) = ChannelConsumer::new(8);

        manager.register(Arc::new(slow)).await.unwrap();
        manager.register(Arc::new(fast)).await.unwrap();

        for _ in 0..4 {
            next(&mut rx_fast).await;
        }
        assert_eq!(manager.connection_count(), 2);

        manager.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_startup_failure_rolls_back_registration() {
        let (manager, sources) = manager_with(FakeLoader::failing());
        let (consumer, _rx) = ChannelConsumer::new(8);

        let err = manager.register(Arc::new(consumer)).await.unwrap_err();
        assert!(err.is_startup());
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.is_fanout_active().await);
        assert_eq!(sources.opened(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_registration_starts_once() {
        let (manager, sources) = manager();

        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..10 {
            let (consumer, rx) = ChannelConsumer::new(8);
            receivers.push(rx);
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.register(Arc::new(consumer)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(manager.connection_count(), 10);
        assert_eq!(manager.pipeline().run_count(), 1);
        assert_eq!(sources.opened(), 1);

        manager.disconnect_all().await;
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.pipeline().is_running());
    }

    #[tokio::test]
    async fn test_reload_keeps_consumers_streaming() {
        let (manager, _) = manager();
        let (consumer, mut rx) = ChannelConsumer::new(8);
        manager.register(Arc::new(consumer)).await.unwrap();
        next(&mut rx).await;

        let mut config = SensorConfig::default();
        config.distance.focal_length = 400.0;
        manager.reload(config).await.unwrap();
        assert_eq!(manager.pipeline().run_count(), 2);

        let frame = timeout(Duration::from_secs(2), async {
            loop {
                let frame = next(&mut rx).await;
                if frame.closest_distance == 200.0 {
                    break frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(frame.total_count, 1);

        manager.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_failed_reload_drops_consumers() {
        let (manager, _) = manager_with(FakeLoader::failing_on(2));
        let (a, mut rx_a) = ChannelConsumer::new(8);
        tokio_test::assert_ok!(manager.register(Arc::new(a)).await);
        next(&mut rx_a).await;

        let err = tokio_test::assert_err!(manager.reload(SensorConfig::default()).await);
        assert!(err.is_startup());
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.pipeline().state(), PipelineState::Stopped);
        assert!(!manager.is_fanout_active().await);

        // the dropped consumer sees its channel close
        let closed = timeout(Duration::from_secs(2), async {
            while rx_a.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());

        let (b, mut rx_b) = ChannelConsumer::new(8);
        tokio_test::assert_ok!(manager.register(Arc::new(b)).await);
        assert!(manager.pipeline().is_running());
        assert_eq!(manager.connection_count(), 1);
        next(&mut rx_b).await;

        manager.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_register_restarts_stopped_pipeline() {
        let (manager, _) = manager();
        let (a, mut rx_a) = ChannelConsumer::new(8);
        manager.register(Arc::new(a)).await.unwrap();
        next(&mut rx_a).await;

        manager.pipeline().stop().await;
        assert!(manager.is_fanout_active().await);

        let (b, mut rx_b) = ChannelConsumer::new(8);
        manager.register(Arc::new(b)).await.unwrap();
        assert!(manager.pipeline().is_running());
        assert_eq!(manager.pipeline().run_count(), 2);
        assert_eq!(manager.connection_count(), 2);
        next(&mut rx_b).await;

        manager.disconnect_all().await;
        assert!(!manager.pipeline().is_running());
    }
}
