//! Connection Liveness Monitor
//!
//! Watches frame arrival on the active connection. Requests a protocol
//! ping on a fixed cadence and declares the connection stale when no
//! frame of any kind (data, ping, pong) has arrived within the idle
//! window, triggering reconnection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for liveness checking.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Interval between outbound ping requests.
    pub ping_interval: Duration,
    /// Maximum time without any inbound frame before the connection is
    /// declared stale.
    pub idle_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl LivenessConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }
}

/// Events emitted by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Request to send a protocol ping.
    SendPing,
    /// No frame arrived within the idle window; the connection must be
    /// torn down.
    IdleTimeout,
}

/// Frame-arrival clock shared between the monitor and the supervisor's
/// read loop.
#[derive(Debug)]
pub struct LivenessState {
    last_frame: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create new state with the clock starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame (of any kind) arrived.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Time elapsed since the last inbound frame.
    #[must_use]
    pub fn time_since_frame(&self) -> Duration {
        self.last_frame.read().elapsed()
    }

    /// Reset the clock for a fresh connection.
    pub fn reset(&self) {
        *self.last_frame.write() = Instant::now();
    }
}

/// Liveness monitor task for one connection.
///
/// Runs until cancelled or until it reports an idle timeout. The
/// supervisor reacts to [`LivenessEvent::SendPing`] by writing a ping
/// frame and to [`LivenessEvent::IdleTimeout`] by closing the
/// connection and entering backoff.
pub struct LivenessMonitor {
    config: LivenessConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<LivenessEvent>,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    /// Create a new monitor.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<LivenessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitoring loop.
    pub async fn run(self) {
        // Check at least twice per idle window so staleness is detected
        // promptly even with a long ping cadence.
        let tick = self
            .config
            .ping_interval
            .min(self.config.idle_timeout / 2)
            .max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so a fresh
        // connection is not pinged before it has settled.
        interval.tick().await;

        let mut last_ping = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check(&mut last_ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check idle state and request a ping when one is due.
    ///
    /// Returns `Err(())` when the loop should exit.
    async fn check(&self, last_ping: &mut Instant) -> Result<(), ()> {
        let idle = self.state.time_since_frame();
        if idle > self.config.idle_timeout {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                timeout_secs = self.config.idle_timeout.as_secs(),
                "Idle timeout detected, connection is stale"
            );
            let _ = self.event_tx.send(LivenessEvent::IdleTimeout).await;
            return Err(());
        }

        if last_ping.elapsed() >= self.config.ping_interval {
            *last_ping = Instant::now();
            if self.event_tx.send(LivenessEvent::SendPing).await.is_err() {
                tracing::debug!("Liveness event channel closed, stopping monitor");
                return Err(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = LivenessConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn state_tracks_frames() {
        let state = LivenessState::new();
        assert!(state.time_since_frame() < Duration::from_millis(100));

        state.record_frame();
        assert!(state.time_since_frame() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn monitor_requests_pings() {
        let config = LivenessConfig::new(Duration::from_millis(20), Duration::from_secs(5));
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let monitor = LivenessMonitor::new(config, Arc::clone(&state), event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        // Keep the connection "alive" while waiting for the ping request.
        state.record_frame();
        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");

        assert_eq!(event, LivenessEvent::SendPing);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn monitor_detects_idle_timeout() {
        let config = LivenessConfig::new(Duration::from_millis(20), Duration::from_millis(40));
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let monitor = LivenessMonitor::new(config, state, event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        // Never record a frame: the monitor must report a timeout.
        let mut saw_timeout = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await
        {
            if event == LivenessEvent::IdleTimeout {
                saw_timeout = true;
                break;
            }
        }

        assert!(saw_timeout, "should report idle timeout");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
    }

    #[tokio::test]
    async fn monitor_stops_on_cancellation() {
        let config = LivenessConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let state = Arc::new(LivenessState::new());
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let monitor = LivenessMonitor::new(config, state, event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "monitor should shut down on cancellation");
    }
}
