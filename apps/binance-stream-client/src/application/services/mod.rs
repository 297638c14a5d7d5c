//! Application Services
//!
//! The [`StreamClient`] facade owns the whole streaming pipeline for
//! one client instance: connection supervisor → frame codec →
//! sequencing buffer → event dispatcher. Construct it, register
//! consumers, subscribe, and shut it down; several independent clients
//! can coexist in one process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BackpressurePolicy, EventConsumer};
use crate::domain::sequencing::{Admission, SequenceBuffer};
use crate::domain::streaming::{ControlMessage, RawFrame, StreamUpdate};
use crate::domain::subscription::{Subscription, SubscriptionManager};
use crate::infrastructure::binance::codec::{Decoded, FrameCodec};
use crate::infrastructure::binance::supervisor::{
    ConnectionState, ConnectionStatus, FeedEvent, StreamSupervisor, SupervisorCommand,
    SupervisorConfig, SupervisorError,
};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::dispatch::{ConsumerId, DispatcherStats, EventDispatcher};
use crate::infrastructure::metrics;

/// Bound on waiting for internal tasks to finish during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Diagnostics
// =============================================================================

/// In-process counters for every recovered failure and delivery
/// outcome. Mirrored into the metrics layer; this handle exists so
/// embedding code can read the numbers without a Prometheus scrape.
#[derive(Debug, Default)]
pub struct Diagnostics {
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    control_messages: AtomicU64,
    duplicates_dropped: AtomicU64,
    gaps_detected: AtomicU64,
    events_dispatched: AtomicU64,
    reconnects: AtomicU64,
}

impl Diagnostics {
    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    fn record_control(&self) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the diagnostics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Raw frames received from the transport.
    pub frames_received: u64,
    /// Frames dropped as malformed.
    pub malformed_frames: u64,
    /// Control frames handled internally.
    pub control_messages: u64,
    /// Events discarded as duplicates.
    pub duplicates_dropped: u64,
    /// Admitted events that carried a gap flag.
    pub gaps_detected: u64,
    /// Updates handed to the dispatcher.
    pub events_dispatched: u64,
    /// Reconnection attempts scheduled.
    pub reconnects: u64,
}

// =============================================================================
// Stream Client
// =============================================================================

/// One resilient streaming client instance.
///
/// # Lifecycle
///
/// [`StreamClient::start`] validates the configuration (an invalid
/// endpoint is the only fatal error), spawns the supervisor and
/// pipeline tasks, and returns immediately. [`StreamClient::shutdown`]
/// cancels both and waits, bounded, for resource release; it is
/// idempotent.
///
/// # Example
///
/// ```rust,no_run
/// use binance_stream_client::application::services::StreamClient;
/// use binance_stream_client::domain::streaming::KlineInterval;
/// use binance_stream_client::domain::subscription::Subscription;
/// use binance_stream_client::infrastructure::config::ClientConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StreamClient::start(ClientConfig::default())?;
/// client.subscribe(Subscription::kline("btcusdt", KlineInterval::OneMinute));
/// // ... register consumers, run ...
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamClient {
    subscriptions: Arc<SubscriptionManager>,
    sequencer: Arc<SequenceBuffer>,
    dispatcher: Arc<EventDispatcher>,
    status: Arc<ConnectionStatus>,
    diagnostics: Arc<Diagnostics>,
    command_tx: mpsc::Sender<SupervisorCommand>,
    cancel: CancellationToken,
    supervisor_handle: parking_lot::Mutex<Option<JoinHandle<Result<(), SupervisorError>>>>,
    pipeline_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamClient {
    /// Validate the configuration and start the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] when the endpoint is
    /// not a WebSocket URI. Transport failures after startup are
    /// handled by reconnection, never returned here.
    pub fn start(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let subscriptions = Arc::new(SubscriptionManager::new());
        let sequencer = Arc::new(SequenceBuffer::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            config.delivery.dispatch_config(),
            cancel.clone(),
        ));
        let diagnostics = Arc::new(Diagnostics::default());

        let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(config.delivery.feed_capacity);
        let (command_tx, command_rx) = mpsc::channel::<SupervisorCommand>(64);

        let supervisor = Arc::new(StreamSupervisor::new(
            SupervisorConfig {
                endpoint: config.endpoint.clone(),
                connect_timeout: config.connection.connect_timeout,
                liveness: config.connection.liveness_config(),
                backoff: config.connection.backoff_config(),
            },
            Arc::clone(&subscriptions),
            feed_tx,
            command_rx,
            cancel.clone(),
        ));
        let status = supervisor.status();

        let supervisor_handle = tokio::spawn(Arc::clone(&supervisor).run());
        let pipeline_handle = tokio::spawn(run_pipeline(
            feed_rx,
            Arc::clone(&sequencer),
            Arc::clone(&dispatcher),
            Arc::clone(&diagnostics),
            cancel.clone(),
        ));

        tracing::info!(endpoint = %config.endpoint, "Stream client started");

        Ok(Self {
            subscriptions,
            sequencer,
            dispatcher,
            status,
            diagnostics,
            command_tx,
            cancel,
            supervisor_handle: parking_lot::Mutex::new(Some(supervisor_handle)),
            pipeline_handle: parking_lot::Mutex::new(Some(pipeline_handle)),
        })
    }

    /// Add a subscription to the active set.
    ///
    /// Idempotent: subscribing twice is a no-op and returns `false`.
    /// The stream's sequence watermark resets, so the first event after
    /// a fresh subscribe is always admitted without a gap flag.
    pub fn subscribe(&self, subscription: Subscription) -> bool {
        let stream = subscription.stream_name();
        if !self.subscriptions.subscribe(subscription) {
            return false;
        }

        self.sequencer.reset(&stream);
        metrics::set_active_subscriptions(self.subscriptions.len() as f64);

        // Best effort on a live connection; every new connection
        // replays the full active set anyway, and a duplicate SUBSCRIBE
        // is harmless on the exchange side.
        if let Err(e) = self
            .command_tx
            .try_send(SupervisorCommand::Subscribe(vec![stream]))
        {
            tracing::warn!(error = %e, "Could not forward live subscribe; will apply on reconnect");
        }
        true
    }

    /// Remove a subscription from the active set.
    ///
    /// Idempotent: unsubscribing an absent subscription is a no-op and
    /// returns `false`.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let stream = subscription.stream_name();
        if !self.subscriptions.unsubscribe(subscription) {
            return false;
        }

        self.sequencer.reset(&stream);
        metrics::set_active_subscriptions(self.subscriptions.len() as f64);

        if let Err(e) = self
            .command_tx
            .try_send(SupervisorCommand::Unsubscribe(vec![stream]))
        {
            tracing::warn!(error = %e, "Could not forward live unsubscribe; will apply on reconnect");
        }
        true
    }

    /// Register a consumer with the given backpressure policy.
    pub fn register_consumer(
        &self,
        name: impl Into<String>,
        consumer: Arc<dyn EventConsumer>,
        policy: BackpressurePolicy,
    ) -> ConsumerId {
        self.dispatcher.register(name, consumer, policy)
    }

    /// Remove a consumer. Returns `false` when the id is unknown.
    pub fn deregister_consumer(&self, id: ConsumerId) -> bool {
        self.dispatcher.deregister(id)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Shared connection status handle (state plus counters).
    #[must_use]
    pub fn status(&self) -> Arc<ConnectionStatus> {
        Arc::clone(&self.status)
    }

    /// Snapshot of the active subscription set, in insertion order.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.snapshot()
    }

    /// Snapshot of the diagnostics counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Per-consumer dispatcher statistics.
    #[must_use]
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Shut the client down: cancel the supervisor and pipeline, and
    /// wait (bounded) for them to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let supervisor_handle = self.supervisor_handle.lock().take();
        if let Some(handle) = supervisor_handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => tracing::info!("Supervisor stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Supervisor stopped with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Supervisor task panicked"),
                Err(_) => tracing::warn!("Supervisor did not stop within the shutdown timeout"),
            }
        }

        let pipeline_handle = self.pipeline_handle.lock().take();
        if let Some(handle) = pipeline_handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::info!("Pipeline stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Pipeline task panicked"),
                Err(_) => tracing::warn!("Pipeline did not stop within the shutdown timeout"),
            }
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Decode, admit and dispatch everything the supervisor emits.
///
/// Decoding and admission are strictly sequential: this task is the
/// only writer of sequence watermarks on the data path, so per-stream
/// ordering holds by construction.
async fn run_pipeline(
    mut feed_rx: mpsc::Receiver<FeedEvent>,
    sequencer: Arc<SequenceBuffer>,
    dispatcher: Arc<EventDispatcher>,
    diagnostics: Arc<Diagnostics>,
    cancel: CancellationToken,
) {
    let codec = FrameCodec::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = feed_rx.recv() => {
                let Some(event) = event else { break };

                match event {
                    FeedEvent::Connected { resubscribed } => {
                        tracing::info!(resubscribed, "Stream live");
                    }
                    FeedEvent::Disconnected => {
                        tracing::warn!("Stream disconnected");
                    }
                    FeedEvent::Reconnecting { attempt, delay } => {
                        diagnostics.record_reconnect();
                        tracing::info!(attempt, delay_ms = delay.as_millis(), "Stream reconnecting");
                    }
                    FeedEvent::Frame(frame) => {
                        handle_frame(&codec, &frame, &sequencer, &dispatcher, &diagnostics).await;
                    }
                }
            }
        }
    }

    tracing::debug!("Pipeline stopped");
}

/// Process one raw frame end to end.
async fn handle_frame(
    codec: &FrameCodec,
    frame: &RawFrame,
    sequencer: &SequenceBuffer,
    dispatcher: &EventDispatcher,
    diagnostics: &Diagnostics,
) {
    diagnostics.record_frame();

    let decoded = match codec.decode(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            // Recovered locally: the frame is dropped and counted, and
            // nothing reaches consumers.
            diagnostics.record_malformed();
            metrics::record_malformed_frame();
            tracing::warn!(error = %e, "Dropping malformed frame");
            return;
        }
    };

    match decoded {
        Decoded::Control(control) => {
            diagnostics.record_control();
            match control {
                ControlMessage::SubscribeAck { id } => {
                    tracing::debug!(id, "Subscription acknowledged");
                }
                ControlMessage::Error { code, message } => {
                    tracing::warn!(code, message = %message, "Exchange error frame");
                }
                ControlMessage::Unhandled { event_type } => {
                    tracing::trace!(event_type = %event_type, "Ignoring unhandled event type");
                }
            }
        }
        Decoded::Event(event) => {
            let stream_id = event.stream_id().to_string();

            match sequencer.admit(&stream_id, event.sequence()) {
                Admission::DuplicateDrop => {
                    diagnostics.record_duplicate();
                    metrics::record_duplicate_drop(&stream_id);
                    tracing::debug!(
                        stream = %stream_id,
                        sequence = event.sequence(),
                        "Dropping duplicate event"
                    );
                }
                Admission::Accept { gap } => {
                    if let Some(gap) = gap {
                        diagnostics.record_gap();
                        metrics::record_gap_detected(&stream_id, gap.len());
                        tracing::warn!(
                            stream = %stream_id,
                            from = gap.from,
                            to = gap.to,
                            "Sequence gap detected"
                        );
                    }

                    diagnostics.record_dispatched();
                    dispatcher.dispatch(StreamUpdate { event, gap }).await;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
