// Report stream: one WebSocket per agent. Each inbound report is ingested in arrival order
// and answered with an Ack; downlink acks (target reassignment) are interleaved as queued.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::ingest::{IngestStats, ingest_frame};
use crate::models::Ack;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLINK_CAPACITY: usize = 16;

/// Decrements the active stream count on drop (connect = +1, drop = -1).
struct StreamGuard(Arc<IngestStats>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.active_streams.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(super) async fn ws_report(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve_report_stream(socket, state).await {
            tracing::info!("report stream error: {}", e);
        }
    })
}

/// Sends one Ack as a JSON text frame. `Ok(false)` when the peer is gone or too slow.
async fn send_ack(socket: &mut WebSocket, ack: &Ack) -> anyhow::Result<bool> {
    let json = serde_json::to_string(ack)?;
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    Ok(matches!(r, Ok(Ok(()))))
}

async fn serve_report_stream(mut socket: WebSocket, state: AppState) -> anyhow::Result<()> {
    state.stats.active_streams.fetch_add(1, Ordering::Relaxed);
    let _guard = StreamGuard(state.stats.clone());
    tracing::info!("agent connected to report stream");

    let (downlink_tx, mut downlink_rx) = mpsc::channel::<Ack>(DOWNLINK_CAPACITY);
    let mut registration: Option<(String, u64)> = None;

    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + WS_PING_INTERVAL, WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result = async {
        loop {
            tokio::select! {
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let outcome =
                                ingest_frame(state.store.as_ref(), text.as_str(), &state.stats).await;
                            if let Some(node_id) = outcome.node_id
                                && registration.as_ref().is_none_or(|(current, _)| *current != node_id)
                            {
                                if let Some((old, id)) = registration.take() {
                                    state.downlinks.unregister(&old, id);
                                }
                                let id = state.downlinks.register(&node_id, downlink_tx.clone());
                                tracing::info!(node_id = %node_id, "report stream bound to node");
                                registration = Some((node_id, id));
                            }
                            if !send_ack(&mut socket, &outcome.ack).await? {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            let ack = Ack::failure("binary frames are not supported");
                            if !send_ack(&mut socket, &ack).await? {
                                break;
                            }
                        }
                        // The close reply is flushed by the next recv, which then yields None.
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("agent half-closed report stream");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "report stream receive failed");
                            break;
                        }
                        None => break,
                    }
                }
                Some(ack) = downlink_rx.recv() => {
                    if !send_ack(&mut socket, &ack).await? {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                    if !matches!(r, Ok(Ok(()))) {
                        break;
                    }
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    if let Some((node_id, id)) = registration {
        state.downlinks.unregister(&node_id, id);
        tracing::info!(node_id = %node_id, "report stream closed");
    }
    result
}
