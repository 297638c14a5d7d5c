//! Connection Supervisor
//!
//! Owns the single physical WebSocket connection to the exchange and
//! drives the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Live
//!                     ^                          |
//!                     |        (error)           v
//!                     +------- Backoff <---------+
//! ```
//!
//! `Disconnected` is terminal and entered only on shutdown. Entering
//! `Live` replays the active subscription set (handshake); while Live,
//! every inbound frame is forwarded to the pipeline as a raw frame and
//! feeds the liveness clock. Errors put the supervisor into `Backoff`,
//! from which it reconnects with exponential backoff and jitter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{RawFrame, StreamId};
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::binance::codec::{CodecError, FrameCodec};
use crate::infrastructure::binance::heartbeat::{
    LivenessConfig, LivenessEvent, LivenessMonitor, LivenessState,
};
use crate::infrastructure::binance::messages::SubscribeRequest;
use crate::infrastructure::binance::reconnect::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// State of the supervised connection. Exactly one instance per
/// client; all transitions happen on the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none being attempted (initial and terminal).
    #[default]
    Disconnected,
    /// Transport connection in progress.
    Connecting,
    /// Connection established, replaying subscriptions.
    Handshaking,
    /// Connected and streaming.
    Live,
    /// Waiting out the reconnection delay after a failure.
    Backoff,
}

impl ConnectionState {
    /// Get the state name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Live => "live",
            Self::Backoff => "backoff",
        }
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The transport could not be established within the timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outbound control message could not be sent.
    #[error("control send failed: {0}")]
    ControlSendFailed(String),

    /// Codec error while encoding a control message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No frame arrived within the idle window.
    #[error("connection stale: no frames within the idle window")]
    Stale,

    /// The server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pipeline or command channel is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Feed Events & Commands
// =============================================================================

/// Events the supervisor emits toward the pipeline.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Entered Live; the active subscription set was replayed.
    Connected {
        /// Number of subscriptions replayed during the handshake.
        resubscribed: usize,
    },
    /// A raw frame arrived.
    Frame(RawFrame),
    /// The connection was lost.
    Disconnected,
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Attempt number since the last healthy period.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
}

/// Subscription changes applied to a live connection.
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Send a SUBSCRIBE for the given streams.
    Subscribe(Vec<StreamId>),
    /// Send an UNSUBSCRIBE for the given streams.
    Unsubscribe(Vec<StreamId>),
}

// =============================================================================
// Connection Status
// =============================================================================

/// Shared, read-only view of the supervisor's state and counters.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
}

impl ConnectionStatus {
    /// Create status in the Disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Live {
            *self.last_connected_at.write() = Some(Utc::now());
        }
        metrics::set_connection_state(state.as_str());
    }

    fn increment_reconnects(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// When the connection last entered Live, if ever.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Total reconnection attempts over the supervisor's lifetime.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Total frames received over the supervisor's lifetime.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// WebSocket endpoint, e.g. `wss://stream.binance.com:9443/ws`.
    pub endpoint: String,
    /// Timeout for establishing the transport.
    pub connect_timeout: Duration,
    /// Liveness configuration.
    pub liveness: LivenessConfig,
    /// Backoff configuration.
    pub backoff: BackoffConfig,
}

/// Supervises one WebSocket connection at a time.
///
/// Manages the connection lifecycle including:
/// - Connect with timeout
/// - Subscription replay on every new connection
/// - Liveness monitoring (ping + idle watchdog)
/// - Automatic reconnection with exponential backoff
pub struct StreamSupervisor {
    config: SupervisorConfig,
    codec: FrameCodec,
    subscriptions: Arc<SubscriptionManager>,
    status: Arc<ConnectionStatus>,
    feed_tx: mpsc::Sender<FeedEvent>,
    command_rx: tokio::sync::Mutex<mpsc::Receiver<SupervisorCommand>>,
    request_id: AtomicU64,
    cancel: CancellationToken,
}

impl StreamSupervisor {
    /// Create a new supervisor.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        subscriptions: Arc<SubscriptionManager>,
        feed_tx: mpsc::Sender<FeedEvent>,
        command_rx: mpsc::Receiver<SupervisorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: FrameCodec::new(),
            subscriptions,
            status: Arc::new(ConnectionStatus::new()),
            feed_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            request_id: AtomicU64::new(1),
            cancel,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<ConnectionStatus> {
        Arc::clone(&self.status)
    }

    /// Run the supervisor loop.
    ///
    /// Returns `Ok(())` on shutdown, or an error when the configured
    /// maximum number of reconnection attempts is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::MaxReconnectAttemptsExceeded`] when
    /// reconnection gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), SupervisorError> {
        let mut policy = BackoffPolicy::new(self.config.backoff.clone());
        let mut command_rx = self.command_rx.lock().await;

        loop {
            if self.cancel.is_cancelled() {
                self.status.set_state(ConnectionState::Disconnected);
                tracing::info!("Supervisor cancelled");
                return Ok(());
            }

            let connection_start = Instant::now();

            match self.connect_and_run(&mut command_rx).await {
                Ok(()) => {
                    self.status.set_state(ConnectionState::Disconnected);
                    tracing::info!("Connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Connection error");
                    let _ = self.feed_tx.send(FeedEvent::Disconnected).await;

                    // A long healthy run resets the backoff schedule.
                    policy.note_uptime(connection_start.elapsed());

                    self.status.set_state(ConnectionState::Backoff);

                    if let Some(delay) = policy.next_delay() {
                        let attempt = policy.attempt_count();
                        self.status.increment_reconnects();
                        metrics::record_reconnect();

                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to stream"
                        );
                        let _ = self
                            .feed_tx
                            .send(FeedEvent::Reconnecting { attempt, delay })
                            .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                self.status.set_state(ConnectionState::Disconnected);
                                tracing::info!("Supervisor cancelled during backoff");
                                return Ok(());
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        self.status.set_state(ConnectionState::Disconnected);
                        return Err(SupervisorError::MaxReconnectAttemptsExceeded);
                    }
                }
            }
        }
    }

    /// Connect, handshake and stream until error or cancellation.
    async fn connect_and_run(
        &self,
        command_rx: &mut mpsc::Receiver<SupervisorCommand>,
    ) -> Result<(), SupervisorError> {
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(endpoint = %self.config.endpoint, "Connecting to stream");

        // Cancellation preempts an in-flight connect attempt.
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(&self.config.endpoint),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result
                .map_err(|_| SupervisorError::ConnectTimeout(self.config.connect_timeout))??,
        };

        let (mut write, mut read) = ws_stream.split();

        // Handshake: replay the active subscription set, in insertion
        // order, so every new connection sees the same stream set.
        self.status.set_state(ConnectionState::Handshaking);
        let streams = self.subscriptions.stream_names();
        let resubscribed = streams.len();
        if !streams.is_empty() {
            let request = SubscribeRequest::subscribe(streams, self.next_request_id());
            self.send_request(&mut write, &request).await?;
            tracing::debug!(count = resubscribed, "Replayed subscriptions");
        }

        self.status.set_state(ConnectionState::Live);
        let _ = self.feed_tx.send(FeedEvent::Connected { resubscribed }).await;

        // Liveness monitoring for this connection only.
        let liveness_state = Arc::new(LivenessState::new());
        let (liveness_tx, mut liveness_rx) = mpsc::channel::<LivenessEvent>(10);
        let liveness_cancel = self.cancel.child_token();
        let monitor = LivenessMonitor::new(
            self.config.liveness.clone(),
            Arc::clone(&liveness_state),
            liveness_tx,
            liveness_cancel.clone(),
        );
        let _monitor_handle = tokio::spawn(monitor.run());

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
                liveness_event = liveness_rx.recv() => {
                    match liveness_event {
                        Some(LivenessEvent::SendPing) => {
                            if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                                break Err(e.into());
                            }
                        }
                        Some(LivenessEvent::IdleTimeout) => {
                            break Err(SupervisorError::Stale);
                        }
                        None => {
                            tracing::debug!("Liveness channel closed");
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(e) = self.apply_command(&mut write, command).await {
                                break Err(e);
                            }
                        }
                        None => break Err(SupervisorError::ChannelClosed),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            liveness_state.record_frame();
                            self.status.increment_frames();
                            metrics::record_frame_received();

                            let frame = RawFrame::new(text.as_bytes().to_vec());
                            if self.feed_tx.send(FeedEvent::Frame(frame)).await.is_err() {
                                break Err(SupervisorError::ChannelClosed);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            liveness_state.record_frame();
                            self.status.increment_frames();
                            metrics::record_frame_received();

                            let frame = RawFrame::new(data.to_vec());
                            if self.feed_tx.send(FeedEvent::Frame(frame)).await.is_err() {
                                break Err(SupervisorError::ChannelClosed);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            liveness_state.record_frame();
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            liveness_state.record_frame();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            break Err(SupervisorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Raw frame variants are handled by tungstenite.
                        }
                        Some(Err(e)) => break Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            break Err(SupervisorError::ConnectionClosed);
                        }
                    }
                }
            }
        };

        liveness_cancel.cancel();
        result
    }

    /// Apply a live subscription change.
    async fn apply_command<W>(
        &self,
        write: &mut W,
        command: SupervisorCommand,
    ) -> Result<(), SupervisorError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let request = match command {
            SupervisorCommand::Subscribe(streams) => {
                tracing::debug!(?streams, "Subscribing on live connection");
                SubscribeRequest::subscribe(streams, self.next_request_id())
            }
            SupervisorCommand::Unsubscribe(streams) => {
                tracing::debug!(?streams, "Unsubscribing on live connection");
                SubscribeRequest::unsubscribe(streams, self.next_request_id())
            }
        };

        self.send_request(write, &request).await
    }

    /// Serialize and send a control request.
    async fn send_request<W>(
        &self,
        write: &mut W,
        request: &SubscribeRequest,
    ) -> Result<(), SupervisorError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let json = self.codec.encode_request(request)?;

        write.send(Message::Text(json.into())).await.map_err(|e| {
            SupervisorError::ControlSendFailed(format!("failed to send control message: {e}"))
        })?;

        Ok(())
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: String) -> SupervisorConfig {
        SupervisorConfig {
            endpoint,
            connect_timeout: Duration::from_millis(100),
            liveness: LivenessConfig::default(),
            backoff: BackoffConfig {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
                jitter_factor: 0.0,
                reset_threshold: Duration::from_secs(60),
                max_attempts: 1,
            },
        }
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Handshaking.as_str(), "handshaking");
        assert_eq!(ConnectionState::Live.as_str(), "live");
        assert_eq!(ConnectionState::Backoff.as_str(), "backoff");
    }

    #[test]
    fn status_starts_disconnected() {
        let status = ConnectionStatus::new();
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert_eq!(status.reconnect_attempts(), 0);
        assert_eq!(status.frames_received(), 0);
        assert!(status.last_connected_at().is_none());
    }

    #[test]
    fn status_records_live_timestamp() {
        let status = ConnectionStatus::new();
        status.set_state(ConnectionState::Live);
        assert_eq!(status.state(), ConnectionState::Live);
        assert!(status.last_connected_at().is_some());
    }

    #[tokio::test]
    async fn cancelled_supervisor_exits_immediately() {
        let (feed_tx, _feed_rx) = mpsc::channel(16);
        let (_command_tx, command_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let supervisor = Arc::new(StreamSupervisor::new(
            test_config("ws://127.0.0.1:1/ws".to_string()),
            Arc::new(SubscriptionManager::new()),
            feed_tx,
            command_rx,
            cancel,
        ));

        let result = supervisor.clone().run().await;
        assert!(result.is_ok());
        assert_eq!(supervisor.status().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_attempts() {
        // A bound-but-never-accepting listener stalls the WebSocket
        // handshake, so the connect timeout fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (feed_tx, mut feed_rx) = mpsc::channel(16);
        let (_command_tx, command_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let supervisor = Arc::new(StreamSupervisor::new(
            test_config(format!("ws://{addr}/ws")),
            Arc::new(SubscriptionManager::new()),
            feed_tx,
            command_rx,
            cancel,
        ));

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.clone().run())
            .await
            .expect("run should finish");

        assert!(matches!(
            result,
            Err(SupervisorError::MaxReconnectAttemptsExceeded)
        ));
        assert_eq!(supervisor.status().state(), ConnectionState::Disconnected);

        // A reconnect was scheduled before giving up.
        let mut saw_reconnecting = false;
        while let Ok(event) = feed_rx.try_recv() {
            if matches!(event, FeedEvent::Reconnecting { .. }) {
                saw_reconnecting = true;
            }
        }
        assert!(saw_reconnecting);

        drop(listener);
    }
}
