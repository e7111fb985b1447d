// Agent-side report stream: a single long-lived WebSocket to the controller.
// Reports go out as JSON text frames; acks are read on a background task.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::models::{Ack, Report};
use crate::prober::Prober;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the controller to finish answering in-flight reports.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("report stream is not connected")]
    NotConnected,

    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("connect to {url} timed out after {timeout_ms} ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("report stream closed by controller")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Ack totals since the client was created (across reconnects).
#[derive(Debug, Default)]
pub struct AckCounters {
    pub received: AtomicU64,
    pub rejected: AtomicU64,
}

struct Connection {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

pub struct StreamClient {
    url: String,
    connect_timeout: Duration,
    prober: Arc<Prober>,
    counters: Arc<AckCounters>,
    conn: Option<Connection>,
}

impl StreamClient {
    /// Acks carrying probe targets are applied to `prober`.
    pub fn new(url: impl Into<String>, connect_timeout: Duration, prober: Arc<Prober>) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            prober,
            counters: Arc::new(AckCounters::default()),
            conn: None,
        }
    }

    pub fn counters(&self) -> Arc<AckCounters> {
        self.counters.clone()
    }

    /// True while a stream is open and its reader has not seen a close or error.
    pub fn is_connected(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::Relaxed))
    }

    /// Opens the stream, replacing any previous connection.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.conn.take() {
            old.reader.abort();
        }
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let (ws_stream, _) =
            match timeout(self.connect_timeout, tokio_tungstenite::connect_async(&self.url)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    return Err(TransportError::Connect {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(TransportError::ConnectTimeout {
                        url: self.url.clone(),
                        timeout_ms,
                    });
                }
            };

        let (sink, stream) = ws_stream.split();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_acks(
            stream,
            self.prober.clone(),
            self.counters.clone(),
            alive.clone(),
        ));
        self.conn = Some(Connection {
            sink,
            reader,
            alive,
        });
        info!(url = %self.url, "report stream connected");
        Ok(())
    }

    /// Sends one report. On failure the connection is dropped; the caller decides when to reconnect.
    pub async fn send(&mut self, report: &Report) -> Result<(), TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        if !conn.alive.load(Ordering::Relaxed) {
            self.drop_connection();
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(report)?;
        let sent = conn.sink.send(Message::Text(json.into())).await;
        if let Err(e) = sent {
            self.drop_connection();
            return Err(TransportError::Send(e.to_string()));
        }
        Ok(())
    }

    /// Half-closes the stream and waits (bounded) for acks of reports already sent.
    /// No-op when never connected.
    pub async fn close(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if let Err(e) = conn.sink.close().await {
            debug!(error = %e, "report stream close handshake failed");
        }
        match timeout(CLOSE_DRAIN_TIMEOUT, &mut conn.reader).await {
            Ok(_) => debug!("report stream drained"),
            Err(_) => {
                warn!(
                    timeout_secs = CLOSE_DRAIN_TIMEOUT.as_secs(),
                    "report stream did not close in time; aborting reader"
                );
                conn.reader.abort();
            }
        }
    }

    fn drop_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.reader.abort();
        }
    }
}

async fn read_acks(
    mut stream: SplitStream<WsStream>,
    prober: Arc<Prober>,
    counters: Arc<AckCounters>,
    alive: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<Ack>(text.as_str()) {
                Ok(ack) => handle_ack(ack, &prober, &counters),
                Err(e) => warn!(error = %e, "undecodable ack frame"),
            },
            Ok(Message::Close(_)) => {
                debug!("controller closed report stream");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "report stream receive failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Relaxed);
}

fn handle_ack(ack: Ack, prober: &Prober, counters: &AckCounters) {
    counters.received.fetch_add(1, Ordering::Relaxed);
    if !ack.success {
        counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(message = %ack.message, "controller rejected report");
    }
    if !ack.probe_targets.is_empty() {
        info!(targets = ack.probe_targets.len(), "probe targets reassigned by controller");
        prober.update_targets(ack.probe_targets);
    }
}
