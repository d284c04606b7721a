// Ferrum Collector - HTTP and WebSocket surface
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP endpoints and the `/feed` WebSocket.
//!
//! Feed clients send JSON requests:
//!
//! ```json
//! {"action": "subscribe", "stream": "resources", "resolution": "seconds", "maxHistory": 300}
//! {"action": "unsubscribe", "stream": "resources", "resolution": "seconds"}
//! ```
//!
//! A subscription first receives its history as one message, oldest point
//! first, then one message per finalized bucket. Problems are reported as
//! `{"error": "..."}`.

use crate::hub::{pack, stream_key, FeedHub, FeedMessage};
use crate::metrics::encode_metrics;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ferrum::SeriesStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outgoing messages queued per WebSocket before producers wait
const OUTBOX_SIZE: usize = 64;

/// Application state shared across handlers.
#[derive(Debug)]
pub struct AppState {
    /// Series by name
    pub stores: HashMap<String, Arc<SeriesStore>>,
    /// Live feed
    pub hub: Arc<FeedHub>,
    /// Cap on history points per subscription
    pub max_history: usize,
    /// Process start
    pub started: Instant,
}

impl AppState {
    /// State serving the given series.
    pub fn new(stores: Vec<Arc<SeriesStore>>, hub: Arc<FeedHub>, max_history: usize) -> Self {
        Self {
            stores: stores
                .into_iter()
                .map(|store| (store.name().to_string(), store))
                .collect(),
            hub,
            max_history,
            started: Instant::now(),
        }
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/feed", get(feed_handler))
        .with_state(state)
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Ferrum Collector</title></head>
<body>
    <h1>Ferrum Collector</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
        <li><a href="/status">/status</a> - Series and watermarks (JSON)</li>
        <li><code>/feed</code> - Live feed (WebSocket)</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4; charset=utf-8")],
        encode_metrics(),
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Status information response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Collector version
    pub version: String,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Served series
    pub series: Vec<SeriesStatus>,
}

/// One series in the status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesStatus {
    /// Series name
    pub name: String,
    /// Resolutions, finest first
    pub resolutions: Vec<ResolutionStatus>,
}

/// One resolution in the status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolutionStatus {
    /// Resolution identifier
    pub identifier: String,
    /// Ticks per bucket
    pub period: u64,
    /// Last closed bucket, absent before initialization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<u64>,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut series: Vec<SeriesStatus> = state
        .stores
        .values()
        .map(|store| SeriesStatus {
            name: store.name().to_string(),
            resolutions: store
                .resolutions()
                .iter()
                .map(|r| ResolutionStatus {
                    identifier: r.identifier().to_string(),
                    period: r.period(),
                    watermark: store.watermark(r).ok(),
                })
                .collect(),
        })
        .collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        series,
    })
}

async fn feed_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| feed_socket(socket, state))
}

async fn feed_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (outbox, mut live) = mpsc::channel(OUTBOX_SIZE);
    let (replies_tx, mut replies) = mpsc::unbounded_channel();
    let mut session = FeedSession::new(state, outbox, replies_tx);

    loop {
        tokio::select! {
            // Replies before queued live points.
            biased;

            Some(text) = replies.recv() => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Feed socket error: {}", e);
                    break;
                }
            },
            Some(text) = live.recv() => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
    session.close();
}

/// Action of a feed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    /// Start receiving a stream
    Subscribe,
    /// Stop receiving a stream
    Unsubscribe,
}

/// A request sent by a feed client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    /// What to do
    pub action: FeedAction,
    /// Series name
    pub stream: String,
    /// Resolution identifier
    pub resolution: String,
    /// History points wanted, capped by the server; the cap if absent
    #[serde(default)]
    pub max_history: Option<usize>,
}

/// Subscriptions of one feed client
///
/// Live points go through the bounded `outbox`, filled by relay tasks.
/// History and error replies go through `replies`, which never blocks, so
/// handling a request cannot wait on a full outbox.
pub struct FeedSession {
    state: Arc<AppState>,
    outbox: mpsc::Sender<String>,
    replies: mpsc::UnboundedSender<String>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl FeedSession {
    /// Create a session writing live points to `outbox` and replies to
    /// `replies`.
    pub fn new(
        state: Arc<AppState>,
        outbox: mpsc::Sender<String>,
        replies: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            state,
            outbox,
            replies,
            subscriptions: HashMap::new(),
        }
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle one text message from the client.
    pub async fn handle(&mut self, text: &str) {
        let request: FeedRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => return self.reply_error(format!("invalid request: {}", e)),
        };

        match request.action {
            FeedAction::Subscribe => {
                if let Err(message) = self.subscribe(&request).await {
                    self.reply_error(message);
                }
            }
            FeedAction::Unsubscribe => {
                let key = stream_key(&request.stream, &request.resolution);
                if let Some(task) = self.subscriptions.remove(&key) {
                    task.abort();
                    debug!(stream = %key, "Unsubscribed");
                }
            }
        }
    }

    /// Drop all subscriptions.
    pub fn close(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }

    async fn subscribe(&mut self, request: &FeedRequest) -> Result<(), String> {
        let store = self
            .state
            .stores
            .get(&request.stream)
            .cloned()
            .ok_or_else(|| format!("unknown stream '{}'", request.stream))?;
        let resolution = store
            .resolution(&request.resolution)
            .cloned()
            .ok_or_else(|| {
                format!(
                    "unknown resolution '{}' for stream '{}'",
                    request.resolution, request.stream
                )
            })?;

        let key = stream_key(store.name(), resolution.identifier());
        if let Some(previous) = self.subscriptions.remove(&key) {
            previous.abort();
        }

        // Subscribe before reading history so nothing falls in between.
        let live = self.state.hub.subscribe(store.name(), resolution.identifier());

        let limit = request
            .max_history
            .unwrap_or(self.state.max_history)
            .min(self.state.max_history);
        let history_store = Arc::clone(&store);
        let history_resolution = resolution.clone();
        let mut history = tokio::task::spawn_blocking(move || {
            history_store.retrieve(&history_resolution, 0, limit)
        })
        .await
        .map_err(|e| format!("history lookup aborted: {}", e))?
        .map_err(|e| format!("history lookup failed: {}", e))?;
        history.reverse();

        let data: Vec<_> = history
            .iter()
            .filter_map(|bucket| match pack(bucket) {
                Ok(point) => Some(point),
                Err(e) => {
                    warn!(stream = %key, "Skipping history bucket {}: {}", bucket.tick, e);
                    None
                }
            })
            .collect();
        let newest = data.last().map_or(0, |point| point.game_tick);

        let message = FeedMessage {
            stream: store.name().to_string(),
            resolution: resolution.identifier().to_string(),
            data,
        };
        self.reply(&message);

        let task = tokio::spawn(forward(live, self.outbox.clone(), newest));
        debug!(stream = %key, history = history.len(), "Subscribed");
        self.subscriptions.insert(key, task);
        Ok(())
    }

    fn reply(&self, message: &FeedMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = self.replies.send(text);
            }
            Err(e) => warn!("Failed to encode feed message: {}", e),
        }
    }

    fn reply_error(&self, message: String) {
        let text = serde_json::json!({ "error": message }).to_string();
        let _ = self.replies.send(text);
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relay live messages, skipping points already sent as history.
async fn forward(
    mut live: broadcast::Receiver<Arc<FeedMessage>>,
    outbox: mpsc::Sender<String>,
    newest_sent: u64,
) {
    loop {
        let message = match live.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Feed subscriber lagged, {} messages lost", missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if message.data.iter().all(|point| point.game_tick <= newest_sent) {
            continue;
        }
        let text = match serde_json::to_string(&*message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode feed message: {}", e);
                continue;
            }
        };
        if outbox.send(text).await.is_err() {
            break;
        }
    }
}
