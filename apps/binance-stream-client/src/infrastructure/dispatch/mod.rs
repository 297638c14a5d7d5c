//! Event Dispatcher
//!
//! Fans admitted updates out to registered consumers. Every consumer
//! owns a bounded queue drained by a dedicated delivery task, so a slow
//! consumer only affects itself; what happens when its queue fills is
//! governed by the backpressure policy chosen at registration.
//!
//! All drops are counted per consumer and reported through
//! [`DispatcherStats`] and the metrics layer, never silent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BackpressurePolicy, EventConsumer};
use crate::domain::streaming::StreamUpdate;
use crate::infrastructure::metrics;

/// Unique identifier for a registered consumer.
pub type ConsumerId = u64;

/// Configuration for the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Default per-consumer queue capacity.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

// =============================================================================
// Consumer Slot
// =============================================================================

/// Per-consumer delivery state shared between the dispatcher and the
/// consumer's delivery task.
#[derive(Debug)]
struct ConsumerSlot {
    id: ConsumerId,
    name: String,
    policy: BackpressurePolicy,
    capacity: usize,
    queue: Mutex<VecDeque<StreamUpdate>>,
    data_ready: Notify,
    space_ready: Notify,
    closed: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ConsumerSlot {
    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_consumer_drop(&self.name);
    }

    /// Push an update, evicting the oldest entry when full.
    fn push_evicting(&self, update: StreamUpdate) {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front().is_some()
            } else {
                false
            };
            queue.push_back(update);
            evicted
        };
        if evicted {
            self.record_drop();
        }
        self.data_ready.notify_one();
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Delivers updates to registered consumers in production order.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use binance_stream_client::application::ports::{BackpressurePolicy, EventConsumer};
/// use binance_stream_client::domain::streaming::StreamUpdate;
/// use binance_stream_client::infrastructure::dispatch::{DispatchConfig, EventDispatcher};
///
/// struct Printer;
///
/// #[async_trait]
/// impl EventConsumer for Printer {
///     async fn on_event(&self, update: StreamUpdate) {
///         println!("{update:?}");
///     }
/// }
///
/// let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
/// let id = dispatcher.register("printer", Arc::new(Printer), BackpressurePolicy::DropOldest);
/// # let _ = id;
/// ```
#[derive(Debug)]
pub struct EventDispatcher {
    config: DispatchConfig,
    slots: RwLock<Vec<Arc<ConsumerSlot>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl EventDispatcher {
    /// Create a new dispatcher. Delivery tasks stop when `cancel` fires.
    #[must_use]
    pub fn new(config: DispatchConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            cancel,
        }
    }

    /// Register a consumer with the default queue capacity.
    pub fn register(
        &self,
        name: impl Into<String>,
        consumer: Arc<dyn EventConsumer>,
        policy: BackpressurePolicy,
    ) -> ConsumerId {
        self.register_with_capacity(name, consumer, policy, self.config.queue_capacity)
    }

    /// Register a consumer with an explicit queue capacity.
    pub fn register_with_capacity(
        &self,
        name: impl Into<String>,
        consumer: Arc<dyn EventConsumer>,
        policy: BackpressurePolicy,
        capacity: usize,
    ) -> ConsumerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ConsumerSlot {
            id,
            name: name.into(),
            policy,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            data_ready: Notify::new(),
            space_ready: Notify::new(),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        self.slots.write().push(Arc::clone(&slot));

        tracing::debug!(
            consumer = %slot.name,
            policy = policy.as_str(),
            capacity = slot.capacity,
            "Consumer registered"
        );

        tokio::spawn(run_delivery(slot, consumer, self.cancel.clone()));

        id
    }

    /// Remove a consumer. Its delivery task drains nothing further and
    /// exits. Returns `false` when the id is unknown.
    pub fn deregister(&self, id: ConsumerId) -> bool {
        let mut slots = self.slots.write();
        let Some(position) = slots.iter().position(|s| s.id == id) else {
            return false;
        };

        let slot = slots.remove(position);
        slot.closed.store(true, Ordering::Release);
        slot.data_ready.notify_one();
        true
    }

    /// Deliver one update to every registered consumer, in registration
    /// order, applying each consumer's backpressure policy.
    pub async fn dispatch(&self, update: StreamUpdate) {
        let slots: Vec<Arc<ConsumerSlot>> = self.slots.read().clone();

        for slot in slots {
            Self::offer(&slot, update.clone()).await;
        }

        metrics::record_event_dispatched();
    }

    /// Offer an update to one consumer according to its policy.
    async fn offer(slot: &Arc<ConsumerSlot>, update: StreamUpdate) {
        match slot.policy {
            BackpressurePolicy::DropOldest => slot.push_evicting(update),
            BackpressurePolicy::DropNewest => {
                let full = {
                    let mut queue = slot.queue.lock();
                    if queue.len() >= slot.capacity {
                        true
                    } else {
                        queue.push_back(update);
                        false
                    }
                };
                if full {
                    slot.record_drop();
                } else {
                    slot.data_ready.notify_one();
                }
            }
            BackpressurePolicy::Block { timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;

                loop {
                    {
                        let mut queue = slot.queue.lock();
                        if queue.len() < slot.capacity {
                            queue.push_back(update);
                            drop(queue);
                            slot.data_ready.notify_one();
                            return;
                        }
                    }

                    // Wait (bounded) for the delivery task to free space.
                    let space = slot.space_ready.notified();
                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        slot.push_evicting(update);
                        return;
                    }
                }
            }
        }
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Statistics for all registered consumers.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let consumers = self
            .slots
            .read()
            .iter()
            .map(|slot| ConsumerStats {
                id: slot.id,
                name: slot.name.clone(),
                delivered: slot.delivered.load(Ordering::Relaxed),
                dropped: slot.dropped.load(Ordering::Relaxed),
                depth: slot.queue.lock().len(),
                capacity: slot.capacity,
            })
            .collect();

        DispatcherStats { consumers }
    }
}

/// Delivery loop for one consumer.
async fn run_delivery(
    slot: Arc<ConsumerSlot>,
    consumer: Arc<dyn EventConsumer>,
    cancel: CancellationToken,
) {
    loop {
        let update = slot.queue.lock().pop_front();

        match update {
            Some(update) => {
                slot.space_ready.notify_one();
                consumer.on_event(update).await;
                slot.delivered.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                if slot.closed.load(Ordering::Acquire) || cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = slot.data_ready.notified() => {}
                }
            }
        }
    }

    tracing::debug!(consumer = %slot.name, "Delivery task stopped");
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single consumer.
#[derive(Debug, Clone)]
pub struct ConsumerStats {
    /// Consumer id.
    pub id: ConsumerId,
    /// Consumer name given at registration.
    pub name: String,
    /// Updates handed to the consumer callback.
    pub delivered: u64,
    /// Updates dropped by the backpressure policy.
    pub dropped: u64,
    /// Current queue depth.
    pub depth: usize,
    /// Queue capacity.
    pub capacity: usize,
}

/// Statistics for all consumers.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Per-consumer statistics, in registration order.
    pub consumers: Vec<ConsumerStats>,
}

impl DispatcherStats {
    /// Total drops across all consumers.
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.consumers.iter().map(|c| c.dropped).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::domain::streaming::{MarketEvent, TradeEvent};

    fn update(sequence: u64) -> StreamUpdate {
        StreamUpdate {
            event: MarketEvent::Trade(TradeEvent {
                stream_id: "btcusdt@trade".to_string(),
                trade_id: sequence,
                price: Decimal::ONE,
                quantity: Decimal::ONE,
                buyer_is_maker: false,
                trade_time: Utc::now(),
            }),
            gap: None,
        }
    }

    /// Records delivered sequences; optionally waits on a gate first.
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                gate: Some(gate),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl EventConsumer for Recorder {
        async fn on_event(&self, update: StreamUpdate) {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.seen.lock().push(update.event.sequence());
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let recorder = Recorder::new();
        dispatcher.register("rec", recorder.clone(), BackpressurePolicy::DropOldest);

        for seq in 1..=5 {
            dispatcher.dispatch(update(seq)).await;
        }

        wait_for(|| recorder.seen().len() == 5).await;
        assert_eq!(recorder.seen(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn drop_oldest_keeps_newest() {
        // Current-thread test runtime: the delivery task cannot run
        // between dispatches because nothing below awaits on the
        // DropOldest path, so the burst lands entirely in the queue.
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let recorder = Recorder::new();
        dispatcher.register_with_capacity(
            "rec",
            recorder.clone(),
            BackpressurePolicy::DropOldest,
            2,
        );

        for seq in 1..=5 {
            dispatcher.dispatch(update(seq)).await;
        }

        // The two newest survive; the oldest three are dropped and counted.
        wait_for(|| recorder.seen().len() == 2).await;
        assert_eq!(recorder.seen(), vec![4, 5]);

        let stats = dispatcher.stats();
        assert_eq!(stats.consumers[0].dropped, 3);
        assert_eq!(stats.total_dropped(), 3);

        // Subsequent events flow normally.
        dispatcher.dispatch(update(6)).await;
        wait_for(|| recorder.seen().len() == 3).await;
        assert_eq!(recorder.seen(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn drop_newest_refuses_latest() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let recorder = Recorder::new();
        dispatcher.register_with_capacity(
            "rec",
            recorder.clone(),
            BackpressurePolicy::DropNewest,
            2,
        );

        for seq in 1..=5 {
            dispatcher.dispatch(update(seq)).await;
        }

        wait_for(|| recorder.seen().len() == 2).await;
        assert_eq!(recorder.seen(), vec![1, 2]);
        assert_eq!(dispatcher.stats().consumers[0].dropped, 3);
    }

    #[tokio::test]
    async fn block_falls_back_to_drop_oldest_on_timeout() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let gate = Arc::new(Semaphore::new(0));
        let recorder = Recorder::gated(Arc::clone(&gate));
        dispatcher.register_with_capacity(
            "rec",
            recorder.clone(),
            BackpressurePolicy::Block {
                timeout: Duration::from_millis(50),
            },
            1,
        );

        // First update is pulled by the delivery task, which then blocks
        // on the gate inside the consumer callback.
        dispatcher.dispatch(update(1)).await;
        // Second update sits in the queue (capacity 1).
        dispatcher.dispatch(update(2)).await;
        // Third update: queue full, delivery blocked; the producer waits
        // out the timeout, then evicts update 2.
        dispatcher.dispatch(update(3)).await;

        assert_eq!(dispatcher.stats().consumers[0].dropped, 1);

        // Release the consumer and drain.
        gate.add_permits(16);
        wait_for(|| recorder.seen().len() == 2).await;
        assert_eq!(recorder.seen(), vec![1, 3]);
    }

    #[tokio::test]
    async fn slow_consumer_does_not_stall_others() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());

        let stuck_gate = Arc::new(Semaphore::new(0));
        let stuck = Recorder::gated(Arc::clone(&stuck_gate));
        let fast = Recorder::new();

        dispatcher.register_with_capacity("stuck", stuck.clone(), BackpressurePolicy::DropOldest, 1);
        dispatcher.register("fast", fast.clone(), BackpressurePolicy::DropOldest);

        for seq in 1..=10 {
            dispatcher.dispatch(update(seq)).await;
        }

        // The fast consumer sees everything even though the slow one
        // never drains.
        wait_for(|| fast.seen().len() == 10).await;
        assert_eq!(fast.seen(), (1..=10).collect::<Vec<_>>());
        assert!(stuck.seen().is_empty());
    }

    #[tokio::test]
    async fn deregister_stops_delivery() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let recorder = Recorder::new();
        let id = dispatcher.register("rec", recorder.clone(), BackpressurePolicy::DropOldest);

        dispatcher.dispatch(update(1)).await;
        wait_for(|| recorder.seen().len() == 1).await;

        assert!(dispatcher.deregister(id));
        assert!(!dispatcher.deregister(id));
        assert_eq!(dispatcher.consumer_count(), 0);

        // Updates after deregistration are not delivered.
        dispatcher.dispatch(update(2)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.seen(), vec![1]);
    }

    #[tokio::test]
    async fn stats_track_delivery() {
        let dispatcher = EventDispatcher::new(DispatchConfig::default(), CancellationToken::new());
        let recorder = Recorder::new();
        dispatcher.register("rec", recorder.clone(), BackpressurePolicy::DropOldest);

        for seq in 1..=3 {
            dispatcher.dispatch(update(seq)).await;
        }

        wait_for(|| dispatcher.stats().consumers[0].delivered == 3).await;
        let stats = dispatcher.stats();
        assert_eq!(stats.consumers[0].name, "rec");
        assert_eq!(stats.consumers[0].dropped, 0);
        assert_eq!(stats.consumers[0].depth, 0);
    }
}
