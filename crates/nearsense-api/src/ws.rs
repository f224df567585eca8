//! WebSocket stream handlers.
//!
//! Every session registers one consumer with the connection manager and
//! forwards result frames through a bounded outbound queue. The three
//! endpoints differ only in how a result frame is rendered:
//!
//! - `/ws/live`: recovery-shaped distance (`distance_data`)
//! - `/ws/detection`: the raw result frame
//! - `/ws/flur`: adaptive JPEG preview (`frame_data`), encoded on its own
//!   tick from the cached camera frame rather than per result frame

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use nearsense_models::{unix_timestamp, ResultFrame, StreamMessage};
use nearsense_sensing::{AdaptiveEncoder, ChannelConsumer, RecoveryState};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket sessions.
static ACTIVE_WS_SESSIONS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Live,
    Detection,
    Flur,
}

impl StreamKind {
    fn endpoint(self) -> &'static str {
        match self {
            StreamKind::Live => "live",
            StreamKind::Detection => "detection",
            StreamKind::Flur => "flur",
        }
    }
}

/// Recovery-shaped distance stream.
pub async fn ws_live(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, StreamKind::Live)
}

/// Full detection stream; answers `ping` with `pong`.
pub async fn ws_detection(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, StreamKind::Detection)
}

/// Adaptive preview stream.
pub async fn ws_flur(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, StreamKind::Flur)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, kind: StreamKind) -> Response {
    metrics::record_ws_connection(kind.endpoint());

    ws.on_upgrade(move |socket| async move {
        let count = ACTIVE_WS_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_sessions(count);

        handle_socket(socket, state, kind).await;

        let count = ACTIVE_WS_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_sessions(count);
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, kind: StreamKind) {
    let (ws_sender, mut receiver) = socket.split();
    let buffer = state.config.ws_send_buffer;

    // Bounded outbound queue drained by a dedicated writer
    let (tx, mut rx) = mpsc::channel::<Message>(buffer);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let (consumer, mut frames) = ChannelConsumer::new(buffer);
    let id = match state.connections.register(Arc::new(consumer)).await {
        Ok(id) => id,
        Err(e) => {
            warn!(endpoint = kind.endpoint(), error = %e, "Stream session could not start");
            metrics::record_ws_startup_failure(kind.endpoint());
            if let Some(json) = to_json(&StreamMessage::error(format!("Detector unavailable: {}", e))) {
                let _ = tx.send(Message::Text(json)).await;
            }
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };
    info!(endpoint = kind.endpoint(), consumer = %id, "Stream session opened");

    let mut renderer = Renderer::new(kind, &state).await;
    let mut ticker = renderer.ticker();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // The manager dropped this consumer; the detector is gone
                    if let Some(json) = to_json(&StreamMessage::error("Detector stopped")) {
                        let _ = tx.send(Message::Text(json)).await;
                    }
                    break;
                };
                let Some(msg) = renderer.render(&frame) else {
                    continue;
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
                metrics::record_ws_message_sent(kind.endpoint());
            }
            _ = next_tick(&mut ticker) => {
                let Some(msg) = renderer.preview(&state).await else {
                    continue;
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
                metrics::record_ws_message_sent(kind.endpoint());
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "ping" && tx.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(endpoint = kind.endpoint(), error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.connections.unregister(id).await;
    drop(tx);
    let _ = send_task.await;
    info!(endpoint = kind.endpoint(), consumer = %id, "Stream session closed");
}

/// Per-session rendering state.
enum Renderer {
    Live(RecoveryState),
    Detection,
    Flur {
        encoder: AdaptiveEncoder,
        interval: Duration,
    },
}

impl Renderer {
    async fn new(kind: StreamKind, state: &AppState) -> Self {
        let sensor = state.pipeline().config();
        match kind {
            StreamKind::Live => {
                let recovery = state.recovery.read().await.clone();
                Renderer::Live(RecoveryState::new(
                    recovery,
                    sensor.distance_mapping.min_distance,
                ))
            }
            StreamKind::Detection => Renderer::Detection,
            StreamKind::Flur => Renderer::Flur {
                encoder: AdaptiveEncoder::new(
                    sensor.streaming.clone(),
                    sensor.distance_mapping.clone(),
                ),
                interval: Duration::from_millis(sensor.streaming.broadcast_interval_ms.max(1)),
            },
        }
    }

    /// Preview tick, for streams that send on their own cadence.
    fn ticker(&self) -> Option<Interval> {
        match self {
            Renderer::Flur { interval, .. } => {
                let mut ticker = tokio::time::interval(*interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(ticker)
            }
            _ => None,
        }
    }

    /// Turn a result frame into an outbound message; `None` sends nothing.
    fn render(&mut self, frame: &ResultFrame) -> Option<Message> {
        let json = match self {
            Renderer::Live(recovery) => to_json(&live_message(recovery, frame, Instant::now())),
            Renderer::Detection => to_json(frame),
            Renderer::Flur { .. } => None,
        }?;
        Some(Message::Text(json))
    }

    /// Encode the cached camera frame with the latest distance.
    ///
    /// `None` skips the tick (no frame cached yet, or encoding failed).
    async fn preview(&mut self, state: &AppState) -> Option<Message> {
        let Renderer::Flur { encoder, .. } = self else {
            return None;
        };
        let image = state.pipeline().current_frame()?;
        let latest = state.pipeline().snapshot();
        let distance = latest.as_ref().map_or(0.0, |s| s.closest_distance);
        let total_count = latest.as_ref().map_or(0, |s| s.total_count);

        let encoder = encoder.clone();
        let preview = tokio::task::spawn_blocking(move || encoder.encode(&image, distance))
            .await
            .ok()
            .flatten()?;
        let json = to_json(&StreamMessage::frame_data(
            preview.image,
            distance,
            total_count,
            unix_timestamp(),
            preview.resolution,
            preview.quality,
        ))?;
        Some(Message::Text(json))
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn live_message(recovery: &mut RecoveryState, frame: &ResultFrame, now: Instant) -> StreamMessage {
    let out = recovery.update(frame.total_count, frame.closest_distance, now);
    StreamMessage::distance_data(out.distance, frame.total_count, frame.timestamp, out.is_recovering)
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream message");
            None
        }
    }
}
